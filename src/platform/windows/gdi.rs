use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::{NonNull, null_mut};

use anyhow::Context;
use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::Graphics::Gdi::{
    BI_BITFIELDS, BI_RGB, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CAPTUREBLT, CreateCompatibleDC,
    CreateDIBSection, DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, HALFTONE, HBITMAP, HDC,
    HGDIOBJ, ROP_CODE, ReleaseDC, SRCCOPY, SelectObject, SetBrushOrgEx, SetStretchBltMode,
    StretchBlt,
};

use crate::backend::BackendBuffer;
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};
use crate::raster::{CaptureFlags, PixelSection, RasterDevice};
use crate::surface::SurfaceHandle;

use super::surface::hwnd;

/// `BITMAPINFO` followed by the three channel masks `BI_BITFIELDS` reads.
#[repr(C)]
struct BitfieldsInfo {
    header: BITMAPINFOHEADER,
    masks: [u32; 3],
}

/// Device context of a window, released on drop.
pub(crate) struct WindowDc {
    hwnd: HWND,
    hdc: HDC,
}

impl WindowDc {
    pub(crate) fn acquire(hwnd: HWND) -> RenderResult<Self> {
        let hdc = unsafe { GetDC(hwnd) };
        if hdc.0.is_null() {
            return Err(RenderError::Platform(anyhow::anyhow!(
                "GetDC returned null for window {:p}",
                hwnd.0
            )));
        }
        Ok(Self { hwnd, hdc })
    }

    pub(crate) fn hdc(&self) -> HDC {
        self.hdc
    }
}

impl Drop for WindowDc {
    fn drop(&mut self) {
        unsafe {
            let _ = ReleaseDC(self.hwnd, self.hdc);
        }
    }
}

/// Raster device backed by GDI DIB sections.
pub(crate) struct GdiDevice;

impl RasterDevice for GdiDevice {
    type Section = DibSection;

    fn create_section(
        &self,
        surface: SurfaceHandle,
        pixel_format: &PixelFormat,
        dimension: Dimension,
    ) -> RenderResult<DibSection> {
        DibSection::new(hwnd(surface), pixel_format, dimension)
    }
}

/// Top-down DIB section selected into a memory DC compatible with the
/// target window.
pub(crate) struct DibSection {
    target: HWND,
    screen_dc: WindowDc,
    mem_dc: HDC,
    bitmap: HBITMAP,
    old_bitmap: HGDIOBJ,
    bits: NonNull<u8>,
    len: usize,
}

impl DibSection {
    fn new(target: HWND, pixel_format: &PixelFormat, dimension: Dimension) -> RenderResult<Self> {
        let width = i32::try_from(dimension.width).map_err(|_| RenderError::BufferOverflow)?;
        let height = i32::try_from(dimension.height).map_err(|_| RenderError::BufferOverflow)?;
        let len = dimension.byte_len(pixel_format.bytes_per_pixel())?;

        let screen_dc = WindowDc::acquire(HWND(null_mut()))?;
        let mem_dc = {
            let window_dc = WindowDc::acquire(target)?;
            unsafe { CreateCompatibleDC(window_dc.hdc()) }
        };
        if mem_dc.0.is_null() {
            return Err(RenderError::Platform(anyhow::anyhow!(
                "CreateCompatibleDC failed"
            )));
        }

        let info = bitmap_info(pixel_format, width, height);
        let mut bits: *mut c_void = null_mut();
        let bitmap = match unsafe {
            CreateDIBSection(
                mem_dc,
                (&info as *const BitfieldsInfo).cast::<BITMAPINFO>(),
                DIB_RGB_COLORS,
                &mut bits,
                HANDLE::default(),
                0,
            )
        }
        .context("CreateDIBSection failed")
        {
            Ok(bitmap) => bitmap,
            Err(err) => {
                unsafe {
                    let _ = DeleteDC(mem_dc);
                }
                return Err(RenderError::Platform(err));
            }
        };

        let Some(bits) = NonNull::new(bits.cast::<u8>()) else {
            unsafe {
                let _ = DeleteObject(bitmap);
                let _ = DeleteDC(mem_dc);
            }
            return Err(RenderError::Platform(anyhow::anyhow!(
                "CreateDIBSection returned no pixel memory"
            )));
        };

        let old_bitmap = unsafe { SelectObject(mem_dc, bitmap) };
        if old_bitmap.0.is_null() {
            unsafe {
                let _ = DeleteObject(bitmap);
                let _ = DeleteDC(mem_dc);
            }
            return Err(RenderError::Platform(anyhow::anyhow!(
                "SelectObject failed for the DIB section"
            )));
        }

        Ok(Self {
            target,
            screen_dc,
            mem_dc,
            bitmap,
            old_bitmap,
            bits,
            len,
        })
    }
}

fn bitmap_info(pixel_format: &PixelFormat, width: i32, height: i32) -> BitfieldsInfo {
    let mut header = BITMAPINFOHEADER {
        biSize: size_of::<BITMAPINFOHEADER>() as u32,
        biWidth: width,
        // Negative height selects a top-down section.
        biHeight: -height,
        biPlanes: 1,
        biBitCount: u16::from(pixel_format.bits_per_pixel),
        biCompression: BI_RGB.0,
        ..Default::default()
    };
    let masks = [
        u32::from(pixel_format.red_max) << pixel_format.red_shift,
        u32::from(pixel_format.green_max) << pixel_format.green_shift,
        u32::from(pixel_format.blue_max) << pixel_format.blue_shift,
    ];
    if *pixel_format != PixelFormat::bgra32() {
        header.biCompression = BI_BITFIELDS.0;
    }
    BitfieldsInfo { header, masks }
}

impl PixelSection for DibSection {
    fn bits(&self) -> BackendBuffer {
        // SAFETY: the DIB section memory lives until `self` is dropped.
        unsafe { BackendBuffer::from_raw_parts(self.bits, self.len) }
    }

    fn blit_from_screen(
        &mut self,
        dst: Rect,
        src_x: i32,
        src_y: i32,
        flags: CaptureFlags,
    ) -> RenderResult<()> {
        let rop = match flags {
            CaptureFlags::Opaque => SRCCOPY,
            CaptureFlags::IncludeLayered => ROP_CODE(SRCCOPY.0 | CAPTUREBLT.0),
        };
        unsafe {
            BitBlt(
                self.mem_dc,
                dst.left,
                dst.top,
                dst.width(),
                dst.height(),
                self.screen_dc.hdc(),
                src_x,
                src_y,
                rop,
            )
        }
        .context("BitBlt from the screen failed")
        .map_err(RenderError::Platform)
    }

    fn blit_to_surface(&mut self, rect: Rect) -> RenderResult<()> {
        let window_dc = WindowDc::acquire(self.target)?;
        unsafe {
            BitBlt(
                window_dc.hdc(),
                rect.left,
                rect.top,
                rect.width(),
                rect.height(),
                self.mem_dc,
                rect.left,
                rect.top,
                SRCCOPY,
            )
        }
        .context("BitBlt to the target window failed")
        .map_err(RenderError::Platform)
    }

    fn stretch_to_surface(&mut self, src: Rect, dst: Rect) -> RenderResult<()> {
        let window_dc = WindowDc::acquire(self.target)?;
        let stretched = unsafe {
            SetStretchBltMode(window_dc.hdc(), HALFTONE);
            // HALFTONE requires the brush origin to be reset afterwards.
            let _ = SetBrushOrgEx(window_dc.hdc(), 0, 0, None);
            StretchBlt(
                window_dc.hdc(),
                dst.left,
                dst.top,
                dst.width(),
                dst.height(),
                self.mem_dc,
                src.left,
                src.top,
                src.width(),
                src.height(),
                SRCCOPY,
            )
        };
        if !stretched.as_bool() {
            return Err(RenderError::Platform(anyhow::anyhow!(
                "StretchBlt to the target window failed"
            )));
        }
        Ok(())
    }
}

impl Drop for DibSection {
    fn drop(&mut self) {
        unsafe {
            let _ = SelectObject(self.mem_dc, self.old_bitmap);
            let _ = DeleteObject(self.bitmap);
            let _ = DeleteDC(self.mem_dc);
        }
    }
}
