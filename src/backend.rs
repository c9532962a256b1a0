use std::ptr::NonNull;
use std::sync::Arc;

use crate::compositor::{self, CompositorApi, CompositorBackend};
use crate::env_config;
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};
use crate::raster::{RasterBackend, RasterDevice};
use crate::surface::{self, SurfaceHandle, SurfaceProvider};

/// Which backend variant renders frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// CPU block-copy path (GDI DIB section on Windows).
    #[default]
    Raster,
    /// Hardware-accelerated path (Direct2D on Windows).
    Compositor,
}

impl RenderMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::Compositor => "compositor",
        }
    }

    /// Parse a user-facing mode name. Accepts the native API names as
    /// aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "raster" | "gdi" => Some(Self::Raster),
            "compositor" | "d2d" | "direct2d" => Some(Self::Compositor),
            _ => None,
        }
    }

    pub(crate) fn from_env() -> Option<Self> {
        env_config::env_var_normalized(env_config::MODE_OVERRIDE_VAR)
            .and_then(|raw| Self::parse(&raw))
    }
}

/// Non-owning view of the CPU-addressable pixel memory owned by a backend.
///
/// The memory stays valid until the owning backend is dropped. Only the
/// coordinator hands these out, and the frame buffer rebinds whenever the
/// backend changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl BackendBuffer {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as the backend that owns the allocation is alive.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Creation inputs shared by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub pixel_format: PixelFormat,
    pub dimension: Dimension,
    pub surface: Option<SurfaceHandle>,
}

impl BackendConfig {
    pub fn new(
        pixel_format: PixelFormat,
        dimension: Dimension,
        surface: Option<SurfaceHandle>,
    ) -> Self {
        Self {
            pixel_format,
            dimension: dimension.clamped(),
            surface,
        }
    }

    pub fn validate(&self) -> RenderResult<()> {
        self.pixel_format.validate_for_backend()?;
        self.buffer_len().map(|_| ())
    }

    pub fn buffer_len(&self) -> RenderResult<usize> {
        let len = self
            .dimension
            .clamped()
            .byte_len(self.pixel_format.bytes_per_pixel())?;
        // Native APIs address the pixel store with signed 32-bit pitches.
        if i32::try_from(len).is_err() {
            return Err(RenderError::InvalidConfig(format!(
                "{}x{} is too large for a single pixel section",
                self.dimension.width, self.dimension.height
            )));
        }
        Ok(len)
    }
}

/// Capture/present capability shared by both backend variants.
pub trait RenderBackend {
    fn mode(&self) -> RenderMode;

    fn dimension(&self) -> Dimension;

    /// Pixel memory callers read and write between capture and present.
    fn buffer(&self) -> BackendBuffer;

    /// Copy screen content into the buffer at `rect`.
    fn capture(&mut self, rect: &Rect) -> RenderResult<()>;

    /// Like [`capture`](Self::capture) but includes layered windows.
    fn capture_transparent(&mut self, rect: &Rect) -> RenderResult<()>;

    /// Draw the buffer region `rect` to the same place on the target
    /// surface. Per-frame failures are logged and absorbed.
    fn present(&mut self, rect: &Rect) -> RenderResult<()>;

    fn present_stretched(&mut self, src: &Rect, dst: &Rect) -> RenderResult<()>;

    /// React to the target surface changing size.
    fn resize(&mut self, rect: &Rect) -> RenderResult<()>;
}

/// Native entry points the coordinator needs: capability probing, surface
/// resolution and backend construction.
pub trait RenderPlatform: Send + Sync {
    /// Cheap construct-and-release check of the accelerated API.
    fn accelerated_available(&self) -> bool;

    fn resolve_surface(&self, requested: Option<SurfaceHandle>) -> RenderResult<SurfaceHandle>;

    /// Confirm that `create_backend(mode, config)` would succeed without
    /// keeping any resource alive.
    fn check_creatable(&self, mode: RenderMode, config: &BackendConfig) -> RenderResult<()>;

    fn create_backend(
        &self,
        mode: RenderMode,
        config: &BackendConfig,
    ) -> RenderResult<Box<dyn RenderBackend>>;
}

/// [`RenderPlatform`] assembled from the window-system, raster and
/// compositor device layers.
pub struct DevicePlatform<S, R, C> {
    surfaces: S,
    raster: R,
    compositor: C,
}

impl<S, R, C> DevicePlatform<S, R, C> {
    pub fn new(surfaces: S, raster: R, compositor: C) -> Self {
        Self {
            surfaces,
            raster,
            compositor,
        }
    }

    pub fn surfaces(&self) -> &S {
        &self.surfaces
    }
}

impl<S, R, C> RenderPlatform for DevicePlatform<S, R, C>
where
    S: SurfaceProvider + Send + Sync,
    R: RasterDevice,
    R::Section: 'static,
    C: CompositorApi,
    C::Factory: 'static,
{
    fn accelerated_available(&self) -> bool {
        env_config::accelerated_allowed() && compositor::is_usable(&self.compositor)
    }

    fn resolve_surface(&self, requested: Option<SurfaceHandle>) -> RenderResult<SurfaceHandle> {
        surface::resolve_surface(&self.surfaces, requested)
    }

    fn check_creatable(&self, mode: RenderMode, config: &BackendConfig) -> RenderResult<()> {
        match mode {
            RenderMode::Raster => config.validate(),
            RenderMode::Compositor => {
                if !env_config::accelerated_allowed() {
                    return Err(RenderError::BackendUnavailable(format!(
                        "disabled by {}",
                        env_config::DISABLE_ACCELERATED_VAR
                    )));
                }
                CompositorBackend::check_creatable(&self.compositor, &self.surfaces, config)
            }
        }
    }

    fn create_backend(
        &self,
        mode: RenderMode,
        config: &BackendConfig,
    ) -> RenderResult<Box<dyn RenderBackend>> {
        match mode {
            RenderMode::Raster => Ok(Box::new(RasterBackend::new(
                &self.raster,
                &self.surfaces,
                config,
            )?)),
            RenderMode::Compositor => Ok(Box::new(CompositorBackend::new(
                &self.compositor,
                &self.surfaces,
                config,
            )?)),
        }
    }
}

/// The platform layer for the current OS.
pub fn default_platform() -> Arc<dyn RenderPlatform> {
    crate::platform::build_platform()
}
