//! Direct2D 1.0 compositor: single-threaded factory, `B8G8R8A8_UNORM`
//! targets with ignored alpha, and 96 DPI so that device-independent pixels
//! equal physical pixels.

use anyhow::Context;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct2D::Common::{
    D2D_RECT_F, D2D_SIZE_U, D2D1_ALPHA_MODE_IGNORE, D2D1_COLOR_F, D2D1_PIXEL_FORMAT,
};
use windows::Win32::Graphics::Direct2D::{
    D2D1_BITMAP_INTERPOLATION_MODE_LINEAR, D2D1_BITMAP_PROPERTIES,
    D2D1_FACTORY_TYPE_SINGLE_THREADED, D2D1_FEATURE_LEVEL_DEFAULT,
    D2D1_HWND_RENDER_TARGET_PROPERTIES, D2D1_PRESENT_OPTIONS_IMMEDIATELY,
    D2D1_RENDER_TARGET_PROPERTIES, D2D1_RENDER_TARGET_TYPE_DEFAULT, D2D1_RENDER_TARGET_USAGE,
    D2D1_RENDER_TARGET_USAGE_GDI_COMPATIBLE, D2D1_RENDER_TARGET_USAGE_NONE, D2D1CreateFactory,
    ID2D1Bitmap, ID2D1DCRenderTarget, ID2D1Factory, ID2D1HwndRenderTarget, ID2D1RenderTarget,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_B8G8R8A8_UNORM;

use crate::compositor::{CompositorApi, CompositorBitmap, CompositorFactory, CompositorTarget};
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, Rect};
use crate::surface::SurfaceHandle;

use super::gdi::WindowDc;
use super::surface::hwnd;

const DPI: f32 = 96.0;
const CLEAR_COLOR: D2D1_COLOR_F = D2D1_COLOR_F {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};

fn pixel_format() -> D2D1_PIXEL_FORMAT {
    D2D1_PIXEL_FORMAT {
        format: DXGI_FORMAT_B8G8R8A8_UNORM,
        alphaMode: D2D1_ALPHA_MODE_IGNORE,
    }
}

fn target_properties(usage: D2D1_RENDER_TARGET_USAGE) -> D2D1_RENDER_TARGET_PROPERTIES {
    D2D1_RENDER_TARGET_PROPERTIES {
        r#type: D2D1_RENDER_TARGET_TYPE_DEFAULT,
        pixelFormat: pixel_format(),
        dpiX: DPI,
        dpiY: DPI,
        usage,
        minLevel: D2D1_FEATURE_LEVEL_DEFAULT,
    }
}

fn size_u(size: Dimension) -> D2D_SIZE_U {
    D2D_SIZE_U {
        width: size.width,
        height: size.height,
    }
}

fn rect_f(rect: Rect) -> D2D_RECT_F {
    D2D_RECT_F {
        left: rect.left as f32,
        top: rect.top as f32,
        right: rect.right as f32,
        bottom: rect.bottom as f32,
    }
}

fn win32_rect(rect: Rect) -> RECT {
    RECT {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.bottom,
    }
}

pub(crate) struct D2dApi;

impl CompositorApi for D2dApi {
    type Factory = D2dFactory;

    fn create_factory(&self) -> RenderResult<D2dFactory> {
        let factory: ID2D1Factory =
            unsafe { D2D1CreateFactory(D2D1_FACTORY_TYPE_SINGLE_THREADED, None) }.map_err(
                |err| RenderError::BackendUnavailable(format!("D2D1CreateFactory failed: {err}")),
            )?;
        Ok(D2dFactory { factory })
    }
}

pub(crate) struct D2dFactory {
    factory: ID2D1Factory,
}

impl CompositorFactory for D2dFactory {
    type Target = D2dTarget;

    fn create_window_target(
        &self,
        surface: SurfaceHandle,
        size: Dimension,
    ) -> RenderResult<D2dTarget> {
        let props = target_properties(D2D1_RENDER_TARGET_USAGE_NONE);
        let hwnd_props = D2D1_HWND_RENDER_TARGET_PROPERTIES {
            hwnd: hwnd(surface),
            pixelSize: size_u(size),
            presentOptions: D2D1_PRESENT_OPTIONS_IMMEDIATELY,
        };
        let target = unsafe { self.factory.CreateHwndRenderTarget(&props, &hwnd_props) }
            .context("CreateHwndRenderTarget failed")
            .map_err(RenderError::Platform)?;
        Ok(D2dTarget {
            kind: TargetKind::Window(target),
            size,
        })
    }

    fn create_dc_target(&self, surface: SurfaceHandle, bounds: Rect) -> RenderResult<D2dTarget> {
        let props = target_properties(D2D1_RENDER_TARGET_USAGE_GDI_COMPATIBLE);
        let target = unsafe { self.factory.CreateDCRenderTarget(&props) }
            .context("CreateDCRenderTarget failed")
            .map_err(RenderError::Platform)?;
        let dc = WindowDc::acquire(hwnd(surface))?;
        unsafe { target.BindDC(dc.hdc(), &win32_rect(bounds)) }
            .context("BindDC failed")
            .map_err(RenderError::Platform)?;
        Ok(D2dTarget {
            kind: TargetKind::DeviceContext { target, dc },
            size: bounds.dimension(),
        })
    }
}

enum TargetKind {
    Window(ID2D1HwndRenderTarget),
    // The target is released before the DC it draws into.
    DeviceContext {
        target: ID2D1DCRenderTarget,
        dc: WindowDc,
    },
}

pub(crate) struct D2dTarget {
    kind: TargetKind,
    size: Dimension,
}

impl D2dTarget {
    fn render_target(&self) -> &ID2D1RenderTarget {
        match &self.kind {
            TargetKind::Window(target) => target,
            TargetKind::DeviceContext { target, .. } => target,
        }
    }
}

impl CompositorTarget for D2dTarget {
    type Bitmap = D2dBitmap;

    fn pixel_size(&self) -> Dimension {
        match &self.kind {
            TargetKind::Window(target) => {
                let size = unsafe { target.GetPixelSize() };
                Dimension::new(size.width, size.height)
            }
            // A DC target reports the size it was last bound with.
            TargetKind::DeviceContext { .. } => self.size,
        }
    }

    fn create_bitmap(&mut self, size: Dimension) -> RenderResult<D2dBitmap> {
        let props = D2D1_BITMAP_PROPERTIES {
            pixelFormat: pixel_format(),
            dpiX: DPI,
            dpiY: DPI,
        };
        let bitmap = unsafe {
            self.render_target()
                .CreateBitmap(size_u(size), None, 0, &props)
        }
        .context("CreateBitmap failed")
        .map_err(RenderError::Platform)?;
        Ok(D2dBitmap { bitmap })
    }

    fn begin_draw(&mut self) {
        unsafe { self.render_target().BeginDraw() };
    }

    fn clear(&mut self) {
        unsafe { self.render_target().Clear(Some(&CLEAR_COLOR)) };
    }

    fn draw_bitmap(&mut self, bitmap: &D2dBitmap, dst: Rect, src: Rect) {
        let dst = rect_f(dst);
        let src = rect_f(src);
        unsafe {
            self.render_target().DrawBitmap(
                &bitmap.bitmap,
                Some(&dst),
                1.0,
                D2D1_BITMAP_INTERPOLATION_MODE_LINEAR,
                Some(&src),
            )
        };
    }

    fn end_draw(&mut self) -> RenderResult<()> {
        unsafe { self.render_target().EndDraw(None, None) }
            .context("EndDraw failed")
            .map_err(RenderError::Platform)
    }

    fn resize(&mut self, size: Dimension) -> RenderResult<()> {
        let TargetKind::Window(target) = &self.kind else {
            return Err(RenderError::UnsupportedOperation(
                "device-context targets are rebound, not resized",
            ));
        };
        unsafe { target.Resize(&size_u(size)) }
            .context("ID2D1HwndRenderTarget::Resize failed")
            .map_err(RenderError::Platform)?;
        self.size = size;
        Ok(())
    }

    fn bind_dc(&mut self, surface: SurfaceHandle, bounds: Rect) -> RenderResult<()> {
        let TargetKind::DeviceContext { target, dc } = &mut self.kind else {
            return Err(RenderError::UnsupportedOperation(
                "window targets are resized, not rebound",
            ));
        };
        let fresh = WindowDc::acquire(hwnd(surface))?;
        unsafe { target.BindDC(fresh.hdc(), &win32_rect(bounds)) }
            .context("BindDC failed")
            .map_err(RenderError::Platform)?;
        *dc = fresh;
        self.size = bounds.dimension();
        Ok(())
    }
}

pub(crate) struct D2dBitmap {
    bitmap: ID2D1Bitmap,
}

impl CompositorBitmap for D2dBitmap {
    fn copy_from_memory(&mut self, pixels: &[u8], pitch: u32) -> RenderResult<()> {
        unsafe { self.bitmap.CopyFromMemory(None, pixels.as_ptr().cast(), pitch) }
            .context("ID2D1Bitmap::CopyFromMemory failed")
            .map_err(RenderError::Platform)
    }
}
