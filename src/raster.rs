use tracing::{debug, warn};

use crate::backend::{BackendBuffer, BackendConfig, RenderBackend, RenderMode};
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};
use crate::surface::{self, SurfaceHandle, SurfaceProvider};

/// Whether a screen grab includes layered (transparent) windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureFlags {
    Opaque,
    IncludeLayered,
}

/// Creates CPU-addressable pixel sections bound to a surface.
pub trait RasterDevice: Send + Sync {
    type Section: PixelSection;

    fn create_section(
        &self,
        surface: SurfaceHandle,
        pixel_format: &PixelFormat,
        dimension: Dimension,
    ) -> RenderResult<Self::Section>;
}

/// An OS-managed pixel store that can exchange blocks with the screen and
/// with the surface it was created for.
pub trait PixelSection {
    fn bits(&self) -> BackendBuffer;

    /// Copy the screen area starting at `(src_x, src_y)` into `dst` of the
    /// section.
    fn blit_from_screen(
        &mut self,
        dst: Rect,
        src_x: i32,
        src_y: i32,
        flags: CaptureFlags,
    ) -> RenderResult<()>;

    /// Copy section area `rect` to the same coordinates of the surface.
    fn blit_to_surface(&mut self, rect: Rect) -> RenderResult<()>;

    fn stretch_to_surface(&mut self, src: Rect, dst: Rect) -> RenderResult<()>;
}

/// Software backend: the pixel section is the caller-visible buffer itself.
pub struct RasterBackend<P> {
    section: P,
    dimension: Dimension,
    /// Virtual-desktop origin recorded at construction; capture coordinates
    /// are relative to it.
    origin: (i32, i32),
    surface: SurfaceHandle,
}

impl<P: PixelSection> RasterBackend<P> {
    pub fn new<D>(
        device: &D,
        surfaces: &dyn SurfaceProvider,
        config: &BackendConfig,
    ) -> RenderResult<Self>
    where
        D: RasterDevice<Section = P>,
    {
        config.validate()?;
        let surface = surface::resolve_surface(surfaces, config.surface)?;
        let dimension = config.dimension.clamped();
        let section = device.create_section(surface, &config.pixel_format, dimension)?;
        let origin = surfaces.desktop_origin();

        debug!(
            width = dimension.width,
            height = dimension.height,
            surface = %surface.stable_id(),
            origin_x = origin.0,
            origin_y = origin.1,
            "raster backend created"
        );

        Ok(Self {
            section,
            dimension,
            origin,
            surface,
        })
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    fn capture_with(&mut self, rect: &Rect, flags: CaptureFlags) -> RenderResult<()> {
        let dst = rect.clamped_to(self.dimension);
        if dst.is_empty() {
            debug!(?rect, "capture rect is outside the pixel section");
            return Ok(());
        }
        self.section
            .blit_from_screen(
                dst,
                dst.left.saturating_add(self.origin.0),
                dst.top.saturating_add(self.origin.1),
                flags,
            )
            .map_err(|err| RenderError::transient("screen capture failed", &err))
    }
}

impl<P: PixelSection> RenderBackend for RasterBackend<P> {
    fn mode(&self) -> RenderMode {
        RenderMode::Raster
    }

    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn buffer(&self) -> BackendBuffer {
        self.section.bits()
    }

    fn capture(&mut self, rect: &Rect) -> RenderResult<()> {
        self.capture_with(rect, CaptureFlags::Opaque)
    }

    fn capture_transparent(&mut self, rect: &Rect) -> RenderResult<()> {
        self.capture_with(rect, CaptureFlags::IncludeLayered)
    }

    fn present(&mut self, rect: &Rect) -> RenderResult<()> {
        let rect = rect.clamped_to(self.dimension);
        if rect.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.section.blit_to_surface(rect) {
            warn!(error = %err, ?rect, "raster present failed, frame skipped");
        }
        Ok(())
    }

    fn present_stretched(&mut self, src: &Rect, dst: &Rect) -> RenderResult<()> {
        // The window system clips the destination against the surface.
        let src = src.clamped_to(self.dimension);
        if src.is_empty() || dst.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.section.stretch_to_surface(src, *dst) {
            warn!(error = %err, ?src, ?dst, "raster stretched present failed, frame skipped");
        }
        Ok(())
    }

    fn resize(&mut self, rect: &Rect) -> RenderResult<()> {
        // The section keeps the frame buffer dimension; stretched presents
        // cover surface size changes.
        debug!(?rect, "raster backend ignores resize");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubRasterDevice, StubSurfaces, bgra_config};

    fn backend(
        surfaces: &StubSurfaces,
        device: &StubRasterDevice,
    ) -> RenderResult<RasterBackend<crate::test_support::StubSection>> {
        RasterBackend::new(device, surfaces, &bgra_config(64, 48, None))
    }

    #[test]
    fn buffer_is_the_section_memory() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let device = StubRasterDevice::default();
        let backend = backend(&surfaces, &device)?;
        let buffer = backend.buffer();
        assert_eq!(buffer.len(), 64 * 48 * 4);
        assert_eq!(device.state.lock().unwrap().section_ptrs, vec![buffer.as_ptr() as usize]);
        Ok(())
    }

    #[test]
    fn capture_translates_by_desktop_origin() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        surfaces.set_desktop_origin(-1920, -120);
        let device = StubRasterDevice::default();
        let mut backend = backend(&surfaces, &device)?;

        backend.capture(&Rect::new(10, 20, 30, 40))?;
        backend.capture_transparent(&Rect::new(0, 0, 8, 8))?;

        let state = device.state.lock().unwrap();
        assert_eq!(
            state.screen_blits,
            vec![
                (Rect::new(10, 20, 30, 40), -1910, -100, CaptureFlags::Opaque),
                (Rect::new(0, 0, 8, 8), -1920, -120, CaptureFlags::IncludeLayered),
            ]
        );
        Ok(())
    }

    #[test]
    fn capture_rect_is_clamped_to_section() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let device = StubRasterDevice::default();
        let mut backend = backend(&surfaces, &device)?;

        backend.capture(&Rect::new(-5, 40, 100, 100))?;
        backend.capture(&Rect::new(200, 200, 300, 300))?;

        let state = device.state.lock().unwrap();
        assert_eq!(state.screen_blits.len(), 1);
        assert_eq!(state.screen_blits[0].0, Rect::new(0, 40, 64, 48));
        Ok(())
    }

    #[test]
    fn present_failure_is_absorbed() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let device = StubRasterDevice::default();
        let mut backend = backend(&surfaces, &device)?;
        device.state.lock().unwrap().fail_present = true;

        backend.present(&Rect::new(0, 0, 64, 48))?;
        backend.present_stretched(&Rect::new(0, 0, 64, 48), &Rect::new(0, 0, 128, 96))?;
        Ok(())
    }

    #[test]
    fn capture_failure_propagates_as_transient() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let device = StubRasterDevice::default();
        let mut backend = backend(&surfaces, &device)?;
        device.state.lock().unwrap().fail_capture = true;

        let err = backend.capture(&Rect::new(0, 0, 4, 4)).unwrap_err();
        assert!(err.is_retryable());
        Ok(())
    }

    #[test]
    fn resize_keeps_section_and_buffer() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let device = StubRasterDevice::default();
        let mut backend = backend(&surfaces, &device)?;
        let before = backend.buffer();

        backend.resize(&Rect::new(0, 0, 1024, 768))?;

        assert_eq!(backend.buffer(), before);
        assert_eq!(backend.dimension(), Dimension::new(64, 48));
        assert_eq!(device.state.lock().unwrap().section_ptrs.len(), 1);
        Ok(())
    }

    #[test]
    fn section_failure_fails_construction() {
        let surfaces = StubSurfaces::default();
        let device = StubRasterDevice::default();
        device.state.lock().unwrap().fail_create = true;
        assert!(backend(&surfaces, &device).is_err());
    }
}
