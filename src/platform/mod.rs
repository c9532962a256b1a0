use std::sync::Arc;

use crate::backend::RenderPlatform;
#[cfg(not(target_os = "windows"))]
use crate::backend::{BackendConfig, RenderBackend, RenderMode};
#[cfg(not(target_os = "windows"))]
use crate::error::{RenderError, RenderResult};
#[cfg(not(target_os = "windows"))]
use crate::surface::SurfaceHandle;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(not(target_os = "windows"))]
fn unsupported_error() -> RenderError {
    RenderError::Platform(anyhow::anyhow!("rendering is only supported on Windows"))
}

#[cfg(not(target_os = "windows"))]
struct UnsupportedPlatform;

#[cfg(not(target_os = "windows"))]
impl RenderPlatform for UnsupportedPlatform {
    fn accelerated_available(&self) -> bool {
        false
    }

    fn resolve_surface(&self, _requested: Option<SurfaceHandle>) -> RenderResult<SurfaceHandle> {
        Err(unsupported_error())
    }

    fn check_creatable(&self, _mode: RenderMode, _config: &BackendConfig) -> RenderResult<()> {
        Err(unsupported_error())
    }

    fn create_backend(
        &self,
        _mode: RenderMode,
        _config: &BackendConfig,
    ) -> RenderResult<Box<dyn RenderBackend>> {
        Err(unsupported_error())
    }
}

#[cfg(target_os = "windows")]
pub(crate) fn build_platform() -> Arc<dyn RenderPlatform> {
    Arc::new(windows::build_platform())
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn build_platform() -> Arc<dyn RenderPlatform> {
    Arc::new(UnsupportedPlatform)
}
