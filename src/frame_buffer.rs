//! Frame buffer whose memory belongs to the active render backend.
//!
//! Pixel operations behave like on any [`PixelBuffer`], but the format,
//! the dimension and the memory itself only change through
//! [`ManagedFrameBuffer::initialize`]. Every other way of replacing them is
//! refused with [`RenderError::UnsupportedOperation`].

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{RenderMode, RenderPlatform};
use crate::coordinator::RenderCoordinator;
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};
use crate::pixel_buffer::PixelBuffer;
use crate::surface::SurfaceHandle;

const TEST_PATTERN_BARS: [(u8, u8, u8); 8] = [
    (0xff, 0xff, 0xff),
    (0xff, 0xff, 0x00),
    (0x00, 0xff, 0xff),
    (0x00, 0xff, 0x00),
    (0xff, 0x00, 0xff),
    (0xff, 0x00, 0x00),
    (0x00, 0x00, 0xff),
    (0x00, 0x00, 0x00),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    /// Mode requested on every [`ManagedFrameBuffer::initialize`]. The
    /// `SNOW_RENDER_MODE` environment variable takes precedence.
    pub preferred_mode: RenderMode,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            preferred_mode: RenderMode::Raster,
        }
    }
}

impl RenderConfig {
    fn effective_mode(&self) -> RenderMode {
        RenderMode::from_env().unwrap_or(self.preferred_mode)
    }
}

#[derive(Default)]
pub struct ManagedFrameBufferBuilder {
    platform: Option<Arc<dyn RenderPlatform>>,
    config: RenderConfig,
}

impl ManagedFrameBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: Arc<dyn RenderPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn preferred_mode(mut self, mode: RenderMode) -> Self {
        self.config.preferred_mode = mode;
        self
    }

    pub fn build(self) -> ManagedFrameBuffer {
        let coordinator = match self.platform {
            Some(platform) => RenderCoordinator::with_platform(platform),
            None => RenderCoordinator::new(),
        };
        ManagedFrameBuffer {
            fb: PixelBuffer::unbound(PixelFormat::bgra32(), Dimension::new(1, 1)),
            coordinator,
            config: self.config,
        }
    }
}

pub struct ManagedFrameBuffer {
    // Declared before the coordinator so the alias goes away before the
    // memory it points into.
    fb: PixelBuffer,
    coordinator: RenderCoordinator,
    config: RenderConfig,
}

impl ManagedFrameBuffer {
    pub fn new() -> Self {
        ManagedFrameBufferBuilder::new().build()
    }

    pub fn builder() -> ManagedFrameBufferBuilder {
        ManagedFrameBufferBuilder::new()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// (Re)create the backend for the given properties and bind the pixel
    /// buffer to its memory.
    pub fn initialize(
        &mut self,
        pixel_format: PixelFormat,
        dimension: Dimension,
        surface: Option<SurfaceHandle>,
    ) -> RenderResult<()> {
        let mode = self.config.effective_mode();
        let result = self
            .coordinator
            .initialize(pixel_format, dimension, surface, mode);
        if result.is_ok() {
            self.fb.reset_properties(pixel_format, dimension);
        }
        // On failure the coordinator either kept the previous backend or has
        // none; the binding follows whichever it is.
        self.rebind()?;
        result
    }

    pub fn switch_mode(&mut self, mode: RenderMode) -> RenderResult<()> {
        let result = self.coordinator.switch_mode(mode);
        self.rebind()?;
        result
    }

    /// Raster until a backend has been created.
    pub fn mode(&self) -> RenderMode {
        self.coordinator.mode()
    }

    pub fn is_initialized(&self) -> bool {
        self.coordinator.is_initialized()
    }

    fn rebind(&mut self) -> RenderResult<()> {
        match self.coordinator.buffer() {
            // SAFETY: the coordinator keeps the backend alive until the next
            // initialize/switch, and both of those rebind here.
            Some(buffer) => unsafe { self.fb.bind(buffer) },
            None => {
                self.fb.unbind();
                Ok(())
            }
        }
    }

    fn require_backend(&self) -> RenderResult<()> {
        if self.coordinator.is_initialized() {
            Ok(())
        } else {
            Err(RenderError::NotInitialized)
        }
    }

    /// The underlying pixel buffer, usable as a source for other buffers.
    pub fn as_pixel_buffer(&self) -> &PixelBuffer {
        &self.fb
    }

    pub fn dimension(&self) -> Dimension {
        self.fb.dimension()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        *self.fb.pixel_format()
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.fb.bits_per_pixel()
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.fb.bytes_per_pixel()
    }

    pub fn bytes_per_row(&self) -> usize {
        self.fb.bytes_per_row()
    }

    pub fn buffer_size(&self) -> usize {
        self.fb.buffer_size()
    }

    /// Same pointer as the active backend's buffer; `None` without one.
    pub fn buffer_ptr(&self) -> Option<*const u8> {
        self.fb.buffer_ptr()
    }

    pub fn buffer_ptr_at(&self, x: i32, y: i32) -> Option<*const u8> {
        self.fb.buffer_ptr_at(x, y)
    }

    pub fn bytes(&self) -> RenderResult<&[u8]> {
        self.fb.bytes()
    }

    pub fn bytes_mut(&mut self) -> RenderResult<&mut [u8]> {
        self.fb.bytes_mut()
    }

    pub fn fill_rect(&mut self, rect: &Rect, color: u32) -> RenderResult<()> {
        self.require_backend()?;
        self.fb.fill_rect(rect, color)
    }

    pub fn set_color(&mut self, red: u8, green: u8, blue: u8) -> RenderResult<()> {
        self.require_backend()?;
        self.fb.set_color(red, green, blue)
    }

    pub fn is_equal_to(&self, other: &PixelBuffer) -> bool {
        self.fb.is_equal_to(other)
    }

    pub fn copy_from(
        &mut self,
        dst_rect: &Rect,
        src: &PixelBuffer,
        src_x: i32,
        src_y: i32,
    ) -> RenderResult<()> {
        self.require_backend()?;
        self.fb.copy_from(dst_rect, src, src_x, src_y)
    }

    pub fn copy_from_all(&mut self, src: &PixelBuffer) -> RenderResult<()> {
        self.require_backend()?;
        self.fb.copy_from_all(src)
    }

    pub fn overlay(
        &mut self,
        dst_rect: &Rect,
        src: &PixelBuffer,
        src_x: i32,
        src_y: i32,
        and_mask: &[u8],
    ) -> RenderResult<()> {
        self.require_backend()?;
        self.fb.overlay(dst_rect, src, src_x, src_y, and_mask)
    }

    pub fn move_rect(&mut self, dst_rect: &Rect, src_x: i32, src_y: i32) -> RenderResult<()> {
        self.require_backend()?;
        self.fb.move_rect(dst_rect, src_x, src_y)
    }

    pub fn cmp_from(
        &self,
        dst_rect: &Rect,
        src: &PixelBuffer,
        src_x: i32,
        src_y: i32,
    ) -> RenderResult<bool> {
        self.require_backend()?;
        self.fb.cmp_from(dst_rect, src, src_x, src_y)
    }

    pub fn assign_properties(&mut self, _src: &PixelBuffer) -> RenderResult<()> {
        Err(refused("assign_properties"))
    }

    pub fn clone_from_buffer(&mut self, _src: &PixelBuffer) -> RenderResult<()> {
        Err(refused("clone_from_buffer"))
    }

    pub fn set_pixel_format(&mut self, _pixel_format: &PixelFormat) -> RenderResult<()> {
        Err(refused("set_pixel_format"))
    }

    pub fn set_dimension(&mut self, _dimension: Dimension) -> RenderResult<()> {
        Err(refused("set_dimension"))
    }

    pub fn set_dimension_from_rect(&mut self, _rect: &Rect) -> RenderResult<()> {
        Err(refused("set_dimension_from_rect"))
    }

    pub fn set_empty_dimension(&mut self, _rect: &Rect) -> RenderResult<()> {
        Err(refused("set_empty_dimension"))
    }

    pub fn set_empty_pixel_format(&mut self, _pixel_format: &PixelFormat) -> RenderResult<()> {
        Err(refused("set_empty_pixel_format"))
    }

    pub fn set_properties(
        &mut self,
        _dimension: Dimension,
        _pixel_format: &PixelFormat,
    ) -> RenderResult<()> {
        Err(refused("set_properties"))
    }

    pub fn set_properties_without_resize(
        &mut self,
        _dimension: Dimension,
        _pixel_format: &PixelFormat,
    ) -> RenderResult<()> {
        Err(refused("set_properties_without_resize"))
    }

    pub fn set_buffer(&mut self, _buffer: *mut u8) -> RenderResult<()> {
        Err(refused("set_buffer"))
    }

    pub fn capture(&mut self, rect: &Rect) -> RenderResult<()> {
        self.coordinator.capture(rect)
    }

    pub fn capture_transparent(&mut self, rect: &Rect) -> RenderResult<()> {
        self.coordinator.capture_transparent(rect)
    }

    pub fn present(&mut self, rect: &Rect) -> RenderResult<()> {
        self.coordinator.present(rect)
    }

    pub fn present_stretched(&mut self, src: &Rect, dst: &Rect) -> RenderResult<()> {
        self.coordinator.present_stretched(src, dst)
    }

    pub fn resize(&mut self, rect: &Rect) -> RenderResult<()> {
        self.coordinator.resize(rect)
    }

    /// Backends track their own target surface; kept for callers that still
    /// announce a new one.
    pub fn set_target_surface(&mut self, surface: SurfaceHandle) -> RenderResult<()> {
        self.require_backend()?;
        debug!(surface = %surface.stable_id(), "target surface change ignored");
        Ok(())
    }

    /// Paint vertical colour bars over the whole buffer and present them.
    /// Failures are logged.
    pub fn draw_test_pattern(&mut self) {
        if let Err(err) = self.paint_test_pattern() {
            warn!(error = %err, mode = self.mode().as_str(), "test pattern failed");
        }
    }

    fn paint_test_pattern(&mut self) -> RenderResult<()> {
        self.require_backend()?;
        let full = self.dimension().to_rect();
        let bars = TEST_PATTERN_BARS.len() as i32;
        let bar_width = (full.width() / bars).max(1);
        for (index, (red, green, blue)) in TEST_PATTERN_BARS.into_iter().enumerate() {
            let left = index as i32 * bar_width;
            let right = if index as i32 == bars - 1 {
                full.right
            } else {
                left + bar_width
            };
            let color = self.fb.pixel_format().pack_rgb(red, green, blue);
            self.fb.fill_rect(&Rect::new(left, 0, right, full.bottom), color)?;
        }
        self.coordinator.present(&full)
    }
}

impl Default for ManagedFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn refused(operation: &'static str) -> RenderError {
    debug!(operation, "refused buffer-replacing operation on a managed frame buffer");
    RenderError::UnsupportedOperation(operation)
}
