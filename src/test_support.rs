//! In-memory stand-ins for the window system, the raster device and the
//! compositor API.

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::backend::{BackendBuffer, BackendConfig, DevicePlatform, RenderPlatform};
use crate::compositor::{CompositorApi, CompositorBitmap, CompositorFactory, CompositorTarget};
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};
use crate::raster::{CaptureFlags, PixelSection, RasterDevice};
use crate::surface::{SurfaceHandle, SurfaceProvider};

pub(crate) const DESKTOP: SurfaceHandle = SurfaceHandle::from_raw_handle(0x10);

pub(crate) fn bgra_config(
    width: u32,
    height: u32,
    surface: Option<SurfaceHandle>,
) -> BackendConfig {
    BackendConfig::new(PixelFormat::bgra32(), Dimension::new(width, height), surface)
}

pub(crate) fn stub_platform(
    surfaces: &StubSurfaces,
    raster: &StubRasterDevice,
    compositor: &StubCompositor,
) -> Arc<dyn RenderPlatform> {
    Arc::new(DevicePlatform::new(
        surfaces.clone(),
        raster.clone(),
        compositor.clone(),
    ))
}

struct SurfaceState {
    windows: HashSet<SurfaceHandle>,
    client_rect: Rect,
    desktop_origin: (i32, i32),
}

#[derive(Clone)]
pub(crate) struct StubSurfaces {
    state: Arc<Mutex<SurfaceState>>,
}

impl Default for StubSurfaces {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(SurfaceState {
                windows: HashSet::from([DESKTOP]),
                client_rect: Rect::new(0, 0, 640, 480),
                desktop_origin: (0, 0),
            })),
        }
    }
}

impl StubSurfaces {
    pub(crate) fn add_window(&self, surface: SurfaceHandle) {
        self.state.lock().unwrap().windows.insert(surface);
    }

    pub(crate) fn set_client_rect(&self, rect: Rect) {
        self.state.lock().unwrap().client_rect = rect;
    }

    pub(crate) fn set_desktop_origin(&self, x: i32, y: i32) {
        self.state.lock().unwrap().desktop_origin = (x, y);
    }
}

impl SurfaceProvider for StubSurfaces {
    fn is_valid(&self, surface: SurfaceHandle) -> bool {
        self.state.lock().unwrap().windows.contains(&surface)
    }

    fn desktop(&self) -> RenderResult<SurfaceHandle> {
        Ok(DESKTOP)
    }

    fn client_rect(&self, _surface: SurfaceHandle) -> RenderResult<Rect> {
        Ok(self.state.lock().unwrap().client_rect)
    }

    fn desktop_origin(&self) -> (i32, i32) {
        self.state.lock().unwrap().desktop_origin
    }
}

#[derive(Default)]
pub(crate) struct RasterState {
    pub(crate) section_ptrs: Vec<usize>,
    pub(crate) live_sections: usize,
    pub(crate) screen_blits: Vec<(Rect, i32, i32, CaptureFlags)>,
    pub(crate) surface_blits: Vec<Rect>,
    pub(crate) stretches: Vec<(Rect, Rect)>,
    /// Pixels "on screen", keyed by screen coordinate.
    pub(crate) screen: HashMap<(i32, i32), [u8; 4]>,
    pub(crate) fail_create: bool,
    pub(crate) fail_capture: bool,
    pub(crate) fail_present: bool,
}

#[derive(Clone, Default)]
pub(crate) struct StubRasterDevice {
    pub(crate) state: Arc<Mutex<RasterState>>,
}

impl RasterDevice for StubRasterDevice {
    type Section = StubSection;

    fn create_section(
        &self,
        _surface: SurfaceHandle,
        pixel_format: &PixelFormat,
        dimension: Dimension,
    ) -> RenderResult<StubSection> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(RenderError::RenderingSubsystem(
                "stub section creation failed".to_string(),
            ));
        }
        let mut bits = vec![0u8; dimension.byte_len(pixel_format.bytes_per_pixel())?];
        let ptr = NonNull::new(bits.as_mut_ptr()).ok_or(RenderError::BufferOverflow)?;
        state.section_ptrs.push(ptr.as_ptr() as usize);
        state.live_sections += 1;
        Ok(StubSection {
            bits,
            ptr,
            width: dimension.width as usize,
            state: Arc::clone(&self.state),
        })
    }
}

pub(crate) struct StubSection {
    bits: Vec<u8>,
    ptr: NonNull<u8>,
    width: usize,
    state: Arc<Mutex<RasterState>>,
}

impl StubSection {
    fn offset(&self, x: i32, y: i32) -> usize {
        (y as usize * self.width + x as usize) * 4
    }
}

impl PixelSection for StubSection {
    fn bits(&self) -> BackendBuffer {
        unsafe { BackendBuffer::from_raw_parts(self.ptr, self.bits.len()) }
    }

    fn blit_from_screen(
        &mut self,
        dst: Rect,
        src_x: i32,
        src_y: i32,
        flags: CaptureFlags,
    ) -> RenderResult<()> {
        let state = Arc::clone(&self.state);
        let mut state = state.lock().unwrap();
        if state.fail_capture {
            return Err(RenderError::Platform(anyhow::anyhow!("stub blit failed")));
        }
        state.screen_blits.push((dst, src_x, src_y, flags));
        for y in 0..dst.height() {
            for x in 0..dst.width() {
                let pixel = state
                    .screen
                    .get(&(src_x + x, src_y + y))
                    .copied()
                    .unwrap_or_default();
                let at = self.offset(dst.left + x, dst.top + y);
                // Writes go through the published pointer, like a real
                // DIB section shared with the frame buffer.
                unsafe {
                    std::ptr::copy_nonoverlapping(pixel.as_ptr(), self.ptr.as_ptr().add(at), 4);
                }
            }
        }
        Ok(())
    }

    fn blit_to_surface(&mut self, rect: Rect) -> RenderResult<()> {
        let state = Arc::clone(&self.state);
        let mut state = state.lock().unwrap();
        if state.fail_present {
            return Err(RenderError::Platform(anyhow::anyhow!("stub present failed")));
        }
        state.surface_blits.push(rect);
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                let at = self.offset(x, y);
                let mut pixel = [0u8; 4];
                unsafe {
                    std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(at), pixel.as_mut_ptr(), 4);
                }
                state.screen.insert((x, y), pixel);
            }
        }
        Ok(())
    }

    fn stretch_to_surface(&mut self, src: Rect, dst: Rect) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_present {
            return Err(RenderError::Platform(anyhow::anyhow!("stub stretch failed")));
        }
        state.stretches.push((src, dst));
        Ok(())
    }
}

impl Drop for StubSection {
    fn drop(&mut self) {
        self.state.lock().unwrap().live_sections -= 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TargetCall {
    BeginDraw,
    Clear,
    DrawBitmap { dst: Rect, src: Rect },
    EndDraw,
}

#[derive(Default)]
pub(crate) struct CompositorState {
    pub(crate) fail_factory: bool,
    pub(crate) fail_window_target: bool,
    pub(crate) fail_dc_target: bool,
    pub(crate) fail_bitmap: bool,
    pub(crate) fail_upload: bool,
    pub(crate) fail_end_draw: bool,
    pub(crate) fail_resize: bool,
    /// Successful target creations left before every target fails; `None`
    /// is unlimited.
    pub(crate) target_budget: Option<usize>,
    pub(crate) factories_created: usize,
    pub(crate) live_factories: usize,
    pub(crate) live_targets: usize,
    pub(crate) bitmap_sizes: Vec<Dimension>,
    pub(crate) dc_binds: Vec<Rect>,
    pub(crate) resizes: Vec<Dimension>,
    pub(crate) uploads: Vec<(usize, u32)>,
    pub(crate) target_calls: Vec<TargetCall>,
    pub(crate) release_order: Vec<&'static str>,
}

#[derive(Clone, Default)]
pub(crate) struct StubCompositor {
    pub(crate) state: Arc<Mutex<CompositorState>>,
}

impl CompositorApi for StubCompositor {
    type Factory = StubFactory;

    fn create_factory(&self) -> RenderResult<StubFactory> {
        let mut state = self.state.lock().unwrap();
        if state.fail_factory {
            return Err(RenderError::BackendUnavailable(
                "stub factory unavailable".to_string(),
            ));
        }
        state.factories_created += 1;
        state.live_factories += 1;
        Ok(StubFactory {
            state: Arc::clone(&self.state),
        })
    }
}

pub(crate) struct StubFactory {
    state: Arc<Mutex<CompositorState>>,
}

impl CompositorState {
    fn spend_target_budget(&mut self) -> bool {
        match &mut self.target_budget {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }
}

impl StubFactory {
    fn target(&self, size: Dimension) -> StubTarget {
        self.state.lock().unwrap().live_targets += 1;
        StubTarget {
            size,
            state: Arc::clone(&self.state),
        }
    }
}

impl CompositorFactory for StubFactory {
    type Target = StubTarget;

    fn create_window_target(
        &self,
        _surface: SurfaceHandle,
        size: Dimension,
    ) -> RenderResult<StubTarget> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_window_target || !state.spend_target_budget() {
                return Err(RenderError::Platform(anyhow::anyhow!(
                    "stub window target failed"
                )));
            }
        }
        Ok(self.target(size))
    }

    fn create_dc_target(&self, _surface: SurfaceHandle, bounds: Rect) -> RenderResult<StubTarget> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_dc_target || !state.spend_target_budget() {
                return Err(RenderError::Platform(anyhow::anyhow!("stub dc target failed")));
            }
            state.dc_binds.push(bounds);
        }
        Ok(self.target(bounds.dimension()))
    }
}

impl Drop for StubFactory {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live_factories -= 1;
        state.release_order.push("factory");
    }
}

pub(crate) struct StubTarget {
    size: Dimension,
    state: Arc<Mutex<CompositorState>>,
}

impl CompositorTarget for StubTarget {
    type Bitmap = StubBitmap;

    fn pixel_size(&self) -> Dimension {
        self.size
    }

    fn create_bitmap(&mut self, size: Dimension) -> RenderResult<StubBitmap> {
        let mut state = self.state.lock().unwrap();
        if state.fail_bitmap {
            return Err(RenderError::Platform(anyhow::anyhow!("stub bitmap failed")));
        }
        state.bitmap_sizes.push(size);
        Ok(StubBitmap {
            state: Arc::clone(&self.state),
        })
    }

    fn begin_draw(&mut self) {
        self.state.lock().unwrap().target_calls.push(TargetCall::BeginDraw);
    }

    fn clear(&mut self) {
        self.state.lock().unwrap().target_calls.push(TargetCall::Clear);
    }

    fn draw_bitmap(&mut self, _bitmap: &StubBitmap, dst: Rect, src: Rect) {
        self.state
            .lock()
            .unwrap()
            .target_calls
            .push(TargetCall::DrawBitmap { dst, src });
    }

    fn end_draw(&mut self) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.target_calls.push(TargetCall::EndDraw);
        if state.fail_end_draw {
            return Err(RenderError::Platform(anyhow::anyhow!("stub end draw failed")));
        }
        Ok(())
    }

    fn resize(&mut self, size: Dimension) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_resize {
            return Err(RenderError::Platform(anyhow::anyhow!("stub resize failed")));
        }
        state.resizes.push(size);
        self.size = size;
        Ok(())
    }

    fn bind_dc(&mut self, _surface: SurfaceHandle, bounds: Rect) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_resize {
            return Err(RenderError::Platform(anyhow::anyhow!("stub rebind failed")));
        }
        state.dc_binds.push(bounds);
        self.size = bounds.dimension();
        Ok(())
    }
}

impl Drop for StubTarget {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live_targets -= 1;
        state.release_order.push("target");
    }
}

pub(crate) struct StubBitmap {
    state: Arc<Mutex<CompositorState>>,
}

impl CompositorBitmap for StubBitmap {
    fn copy_from_memory(&mut self, pixels: &[u8], pitch: u32) -> RenderResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upload {
            return Err(RenderError::Platform(anyhow::anyhow!("stub upload failed")));
        }
        state.uploads.push((pixels.len(), pitch));
        Ok(())
    }
}

impl Drop for StubBitmap {
    fn drop(&mut self) {
        self.state.lock().unwrap().release_order.push("bitmap");
    }
}
