use std::ffi::c_void;

use anyhow::Context;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::UI::WindowsAndMessaging::{
    GetClientRect, GetDesktopWindow, GetSystemMetrics, IsWindow, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN,
};

use crate::error::{RenderError, RenderResult};
use crate::geometry::Rect;
use crate::surface::{SurfaceHandle, SurfaceProvider};

pub(crate) fn hwnd(surface: SurfaceHandle) -> HWND {
    HWND(surface.raw_handle() as *mut c_void)
}

/// Window-system queries backed by user32.
pub(crate) struct Win32Surfaces;

impl SurfaceProvider for Win32Surfaces {
    fn is_valid(&self, surface: SurfaceHandle) -> bool {
        !surface.is_null() && unsafe { IsWindow(hwnd(surface)) }.as_bool()
    }

    fn desktop(&self) -> RenderResult<SurfaceHandle> {
        let desktop = unsafe { GetDesktopWindow() };
        if desktop.0.is_null() {
            return Err(RenderError::InvalidTarget(
                "GetDesktopWindow returned null".to_string(),
            ));
        }
        Ok(SurfaceHandle::from_raw_handle(desktop.0 as isize))
    }

    fn client_rect(&self, surface: SurfaceHandle) -> RenderResult<Rect> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(hwnd(surface), &mut rect) }
            .with_context(|| format!("GetClientRect failed for {}", surface.stable_id()))
            .map_err(RenderError::Platform)?;
        Ok(Rect::new(rect.left, rect.top, rect.right, rect.bottom))
    }

    fn desktop_origin(&self) -> (i32, i32) {
        unsafe {
            (
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
            )
        }
    }
}
