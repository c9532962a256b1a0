use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{self, BackendBuffer, BackendConfig, RenderBackend, RenderMode, RenderPlatform};
use crate::error::{RenderError, RenderErrorClass, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};
use crate::surface::SurfaceHandle;

/// Owns the single active backend and decides which variant it is.
///
/// Not internally synchronized: every call, mode switches included, must be
/// serialized by the caller.
pub struct RenderCoordinator {
    platform: Arc<dyn RenderPlatform>,
    config: Option<BackendConfig>,
    mode: RenderMode,
    backend: Option<Box<dyn RenderBackend>>,
}

impl RenderCoordinator {
    pub fn new() -> Self {
        Self::with_platform(backend::default_platform())
    }

    pub fn with_platform(platform: Arc<dyn RenderPlatform>) -> Self {
        Self {
            platform,
            config: None,
            mode: RenderMode::default(),
            backend: None,
        }
    }

    /// Checks the accelerated path of the current OS without any coordinator.
    pub fn is_accelerated_available() -> bool {
        backend::default_platform().accelerated_available()
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.config.map(|config| config.pixel_format)
    }

    pub fn dimension(&self) -> Option<Dimension> {
        self.config.map(|config| config.dimension)
    }

    /// Surface the active backend renders to, after desktop substitution.
    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.config.and_then(|config| config.surface)
    }

    /// Pixel memory of the active backend; `None` while no backend exists.
    pub fn buffer(&self) -> Option<BackendBuffer> {
        self.backend.as_ref().map(|backend| backend.buffer())
    }

    pub fn initialize(
        &mut self,
        pixel_format: PixelFormat,
        dimension: Dimension,
        surface: Option<SurfaceHandle>,
        requested: RenderMode,
    ) -> RenderResult<()> {
        let config = BackendConfig::new(pixel_format, dimension, surface);
        // Rejected configurations leave the current backend alone.
        config.validate()?;

        let mut mode = requested;
        if mode == RenderMode::Compositor && !self.platform.accelerated_available() {
            info!("accelerated rendering unavailable, initializing in raster mode");
            mode = RenderMode::Raster;
        }

        self.destroy_backend();
        self.config = Some(config);
        self.mode = mode;
        self.create_backend()
    }

    /// Replace the active backend with one of `requested` mode.
    ///
    /// A compositor request is checked before anything is torn down, so a
    /// refused switch leaves the current backend untouched.
    pub fn switch_mode(&mut self, requested: RenderMode) -> RenderResult<()> {
        let config = self.config.ok_or(RenderError::NotInitialized)?;
        if self.backend.is_none() {
            return Err(RenderError::NotInitialized);
        }
        if requested == self.mode {
            debug!(mode = requested.as_str(), "render mode unchanged");
            return Ok(());
        }

        if requested == RenderMode::Compositor {
            if !self.platform.accelerated_available() {
                warn!("accelerated rendering unavailable, keeping current backend");
                return Err(RenderError::BackendUnavailable(
                    "accelerated rendering is not available".to_string(),
                ));
            }
            if let Err(err) = self.platform.check_creatable(requested, &config) {
                warn!(
                    error = %err,
                    "compositor backend cannot be created, keeping current backend"
                );
                return Err(RenderError::BackendUnavailable(format!(
                    "compositor backend cannot be created: {err}"
                )));
            }
        }

        let previous = self.mode;
        self.destroy_backend();
        self.mode = requested;
        self.create_backend()?;

        if self.mode != requested {
            return Err(RenderError::BackendUnavailable(format!(
                "{} backend failed after the switch, running in {} mode",
                requested.as_str(),
                self.mode.as_str()
            )));
        }
        info!(
            from = previous.as_str(),
            to = requested.as_str(),
            "render mode switched"
        );
        Ok(())
    }

    /// Build a backend for the stored configuration and current mode.
    ///
    /// Compositor mode degrades to raster. A raster failure leaves no
    /// backend, resets the mode to raster and is fatal.
    fn create_backend(&mut self) -> RenderResult<()> {
        let result = self.try_create_backend();
        if result.is_err() {
            self.mode = RenderMode::Raster;
        }
        result
    }

    fn try_create_backend(&mut self) -> RenderResult<()> {
        let Some(config) = self.config.as_mut() else {
            return Err(RenderError::NotInitialized);
        };
        let surface = self.platform.resolve_surface(config.surface)?;
        config.surface = Some(surface);
        let config = *config;

        let attempts: &[RenderMode] = match self.mode {
            RenderMode::Compositor => &[RenderMode::Compositor, RenderMode::Raster],
            RenderMode::Raster => &[RenderMode::Raster],
        };

        let mut errors: Vec<(RenderMode, RenderError)> = Vec::new();
        for &mode in attempts {
            match self.platform.create_backend(mode, &config) {
                Ok(backend) => {
                    if mode != self.mode {
                        warn!(
                            requested = self.mode.as_str(),
                            active = mode.as_str(),
                            "falling back to a different render backend"
                        );
                    }
                    info!(
                        mode = mode.as_str(),
                        width = config.dimension.width,
                        height = config.dimension.height,
                        surface = %surface.stable_id(),
                        "render backend active"
                    );
                    self.mode = mode;
                    self.backend = Some(backend);
                    return Ok(());
                }
                Err(err) if err.class() == RenderErrorClass::InvalidInput => return Err(err),
                Err(err) => {
                    warn!(mode = mode.as_str(), error = %err, "render backend creation failed");
                    errors.push((mode, err));
                }
            }
        }

        Err(RenderError::RenderingSubsystem(format!(
            "no render backend could be created: {}",
            format_backend_errors(&errors)
        )))
    }

    /// Release the active backend, if any. Safe to call repeatedly.
    pub fn destroy_backend(&mut self) {
        if let Some(backend) = self.backend.take() {
            let mode = backend.mode();
            drop(backend);
            debug!(mode = mode.as_str(), "render backend destroyed");
        }
    }

    fn active(&mut self) -> RenderResult<&mut (dyn RenderBackend + 'static)> {
        self.backend
            .as_deref_mut()
            .ok_or(RenderError::NotInitialized)
    }

    pub fn capture(&mut self, rect: &Rect) -> RenderResult<()> {
        self.active()?.capture(rect)
    }

    pub fn capture_transparent(&mut self, rect: &Rect) -> RenderResult<()> {
        self.active()?.capture_transparent(rect)
    }

    pub fn present(&mut self, rect: &Rect) -> RenderResult<()> {
        self.active()?.present(rect)
    }

    pub fn present_stretched(&mut self, src: &Rect, dst: &Rect) -> RenderResult<()> {
        self.active()?.present_stretched(src, dst)
    }

    pub fn resize(&mut self, rect: &Rect) -> RenderResult<()> {
        self.active()?.resize(rect)
    }
}

impl Default for RenderCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RenderCoordinator {
    fn drop(&mut self) {
        self.destroy_backend();
    }
}

fn format_backend_errors(errors: &[(RenderMode, RenderError)]) -> String {
    let mut combined = String::new();
    for (index, (mode, error)) in errors.iter().enumerate() {
        if index != 0 {
            combined.push_str("; ");
        }
        combined.push_str(mode.as_str());
        combined.push_str(": ");
        combined.push_str(&error.to_string());
    }
    combined
}
