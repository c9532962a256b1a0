use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::geometry::Rect;

/// Native window (drawing surface) handle. On Windows this is an `HWND`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    handle: isize,
}

impl SurfaceHandle {
    pub const fn from_raw_handle(raw_handle: isize) -> Self {
        Self { handle: raw_handle }
    }

    pub const fn raw_handle(&self) -> isize {
        self.handle
    }

    pub const fn is_null(&self) -> bool {
        self.handle == 0
    }

    pub fn stable_id(&self) -> String {
        format!("{:016x}", self.handle as usize as u64)
    }
}

/// Window-system queries shared by both backends.
pub trait SurfaceProvider {
    fn is_valid(&self, surface: SurfaceHandle) -> bool;

    /// The desktop (root) window, used when no usable target was supplied.
    fn desktop(&self) -> RenderResult<SurfaceHandle>;

    /// Client area of the surface in its own coordinates.
    fn client_rect(&self, surface: SurfaceHandle) -> RenderResult<Rect>;

    /// Top-left corner of the virtual desktop. Negative when a monitor sits
    /// left of or above the primary one.
    fn desktop_origin(&self) -> (i32, i32);
}

/// Substitute the desktop surface when the requested one is absent or no
/// longer a live window.
pub fn resolve_surface(
    provider: &dyn SurfaceProvider,
    requested: Option<SurfaceHandle>,
) -> RenderResult<SurfaceHandle> {
    if let Some(surface) = requested {
        if !surface.is_null() && provider.is_valid(surface) {
            return Ok(surface);
        }
        debug!(
            surface = %surface.stable_id(),
            "target surface is not a valid window, using the desktop"
        );
    }

    let desktop = provider.desktop()?;
    if desktop.is_null() || !provider.is_valid(desktop) {
        return Err(RenderError::InvalidTarget(
            "no target surface and the desktop window is unavailable".to_string(),
        ));
    }
    Ok(desktop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubSurfaces;

    #[test]
    fn valid_surface_is_kept() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let window = SurfaceHandle::from_raw_handle(0x42);
        surfaces.add_window(window);
        assert_eq!(resolve_surface(&surfaces, Some(window))?, window);
        Ok(())
    }

    #[test]
    fn null_or_dead_surface_falls_back_to_desktop() -> RenderResult<()> {
        let surfaces = StubSurfaces::default();
        let desktop = surfaces.desktop()?;
        assert_eq!(resolve_surface(&surfaces, None)?, desktop);
        assert_eq!(
            resolve_surface(&surfaces, Some(SurfaceHandle::from_raw_handle(0)))?,
            desktop
        );
        assert_eq!(
            resolve_surface(&surfaces, Some(SurfaceHandle::from_raw_handle(0x99)))?,
            desktop
        );
        Ok(())
    }
}
