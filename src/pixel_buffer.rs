//! Rectangular pixel store with a fixed format and dimension.
//!
//! The memory is either owned by the buffer or borrowed from a live backend.
//! Region arguments are clipped against every buffer involved, so callers can
//! pass rectangles that hang off an edge.

use crate::backend::BackendBuffer;
use crate::error::{RenderError, RenderResult};
use crate::geometry::{Dimension, PixelFormat, Rect};

enum Storage {
    Unbound,
    Owned(Vec<u8>),
    Bound(BackendBuffer),
}

pub struct PixelBuffer {
    pixel_format: PixelFormat,
    dimension: Dimension,
    storage: Storage,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = match self.storage {
            Storage::Unbound => "unbound",
            Storage::Owned(_) => "owned",
            Storage::Bound(_) => "bound",
        };
        f.debug_struct("PixelBuffer")
            .field("pixel_format", &self.pixel_format)
            .field("dimension", &self.dimension)
            .field("storage", &storage)
            .finish()
    }
}

impl PixelBuffer {
    /// Zero-filled buffer owning its memory.
    pub fn new(pixel_format: PixelFormat, dimension: Dimension) -> RenderResult<Self> {
        let dimension = dimension.clamped();
        let len = dimension.byte_len(pixel_format.bytes_per_pixel())?;
        Ok(Self {
            pixel_format,
            dimension,
            storage: Storage::Owned(vec![0; len]),
        })
    }

    /// Buffer with properties but no memory until [`bind`](Self::bind).
    pub fn unbound(pixel_format: PixelFormat, dimension: Dimension) -> Self {
        Self {
            pixel_format,
            dimension: dimension.clamped(),
            storage: Storage::Unbound,
        }
    }

    pub fn pixel_format(&self) -> &PixelFormat {
        &self.pixel_format
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn bits_per_pixel(&self) -> u8 {
        self.pixel_format.bits_per_pixel
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.pixel_format.bytes_per_pixel()
    }

    pub fn bytes_per_row(&self) -> usize {
        self.dimension.width as usize * self.bytes_per_pixel()
    }

    pub fn buffer_size(&self) -> usize {
        self.bytes_per_row() * self.dimension.height as usize
    }

    pub fn has_buffer(&self) -> bool {
        !matches!(self.storage, Storage::Unbound)
    }

    pub fn buffer_ptr(&self) -> Option<*const u8> {
        match &self.storage {
            Storage::Unbound => None,
            Storage::Owned(bytes) => Some(bytes.as_ptr()),
            Storage::Bound(buffer) => Some(buffer.as_ptr().cast_const()),
        }
    }

    /// Address of pixel `(x, y)`, or `None` outside the buffer or when
    /// unbound.
    pub fn buffer_ptr_at(&self, x: i32, y: i32) -> Option<*const u8> {
        let offset = self.offset_of(x, y)?;
        self.buffer_ptr().map(|ptr| ptr.wrapping_add(offset))
    }

    pub fn bytes(&self) -> RenderResult<&[u8]> {
        match &self.storage {
            Storage::Unbound => Err(RenderError::NotInitialized),
            Storage::Owned(bytes) => Ok(bytes.as_slice()),
            // SAFETY: `bind` requires the backend memory to stay valid and
            // at least `buffer_size` long while bound.
            Storage::Bound(buffer) => Ok(unsafe {
                std::slice::from_raw_parts(buffer.as_ptr().cast_const(), self.buffer_size())
            }),
        }
    }

    pub fn bytes_mut(&mut self) -> RenderResult<&mut [u8]> {
        let len = self.buffer_size();
        match &mut self.storage {
            Storage::Unbound => Err(RenderError::NotInitialized),
            Storage::Owned(bytes) => Ok(bytes.as_mut_slice()),
            // SAFETY: see `bytes`.
            Storage::Bound(buffer) => {
                Ok(unsafe { std::slice::from_raw_parts_mut(buffer.as_ptr(), len) })
            }
        }
    }

    /// Alias backend-owned memory.
    ///
    /// # Safety
    ///
    /// The backend owning `buffer` must outlive the binding; call
    /// [`unbind`](Self::unbind) or rebind before it is dropped.
    pub(crate) unsafe fn bind(&mut self, buffer: BackendBuffer) -> RenderResult<()> {
        if buffer.len() < self.buffer_size() {
            return Err(RenderError::BufferOverflow);
        }
        self.storage = Storage::Bound(buffer);
        Ok(())
    }

    pub(crate) fn unbind(&mut self) {
        self.storage = Storage::Unbound;
    }

    /// Replace format and dimension. Drops any binding.
    pub(crate) fn reset_properties(&mut self, pixel_format: PixelFormat, dimension: Dimension) {
        self.pixel_format = pixel_format;
        self.dimension = dimension.clamped();
        self.storage = Storage::Unbound;
    }

    fn full_rect(&self) -> Rect {
        self.dimension.to_rect()
    }

    fn offset_of(&self, x: i32, y: i32) -> Option<usize> {
        let x = usize::try_from(x).ok()?;
        let y = usize::try_from(y).ok()?;
        if x >= self.dimension.width as usize || y >= self.dimension.height as usize {
            return None;
        }
        Some(y * self.bytes_per_row() + x * self.bytes_per_pixel())
    }

    /// Pixel bytes of `color` in this buffer's byte order.
    fn encode(&self, color: u32) -> [u8; 4] {
        let bpp = self.bytes_per_pixel().min(4);
        let mut pixel = [0u8; 4];
        if self.pixel_format.big_endian {
            pixel[..bpp].copy_from_slice(&color.to_be_bytes()[4 - bpp..]);
        } else {
            pixel[..bpp].copy_from_slice(&color.to_le_bytes()[..bpp]);
        }
        pixel
    }

    pub fn fill_rect(&mut self, rect: &Rect, color: u32) -> RenderResult<()> {
        let rect = rect.clamped_to(self.dimension);
        let bpp = self.bytes_per_pixel();
        if rect.is_empty() || bpp == 0 {
            return Ok(());
        }
        let stride = self.bytes_per_row();
        let pixel = self.encode(color);
        let pixel = &pixel[..bpp.min(4)];
        let span = index(rect.left) * bpp..index(rect.right) * bpp;
        let rows = &mut self.bytes_mut()?[index(rect.top) * stride..index(rect.bottom) * stride];

        for row in rows.chunks_mut(stride) {
            for px in row[span.clone()].chunks_exact_mut(bpp) {
                px[..pixel.len()].copy_from_slice(pixel);
            }
        }
        Ok(())
    }

    /// Fill the whole buffer with an RGB colour packed for this format.
    pub fn set_color(&mut self, red: u8, green: u8, blue: u8) -> RenderResult<()> {
        let color = self.pixel_format.pack_rgb(red, green, blue);
        self.fill_rect(&self.full_rect(), color)
    }

    pub fn is_equal_to(&self, other: &PixelBuffer) -> bool {
        if self.pixel_format != other.pixel_format || self.dimension != other.dimension {
            return false;
        }
        match (self.bytes(), other.bytes()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }

    /// Copy the source area starting at `(src_x, src_y)` into `dst_rect`.
    pub fn copy_from(
        &mut self,
        dst_rect: &Rect,
        src: &PixelBuffer,
        src_x: i32,
        src_y: i32,
    ) -> RenderResult<()> {
        self.ensure_same_format(src)?;
        let Some((dst, sx, sy)) =
            clip_pair(dst_rect, self.dimension, src_x, src_y, src.dimension)
        else {
            return Ok(());
        };

        let bpp = self.bytes_per_pixel();
        let (dst_stride, src_stride) = (self.bytes_per_row(), src.bytes_per_row());
        let row_len = dst.width() as usize * bpp;
        let src_bytes = src.bytes()?;
        let dst_bytes = self.bytes_mut()?;
        for row in 0..dst.height() as usize {
            let d = (index(dst.top) + row) * dst_stride + index(dst.left) * bpp;
            let s = (index(sy) + row) * src_stride + index(sx) * bpp;
            dst_bytes[d..d + row_len].copy_from_slice(&src_bytes[s..s + row_len]);
        }
        Ok(())
    }

    /// Copy as much of `src` as fits, anchored at the origin of both.
    pub fn copy_from_all(&mut self, src: &PixelBuffer) -> RenderResult<()> {
        self.copy_from(&self.full_rect(), src, 0, 0)
    }

    /// Like [`copy_from`](Self::copy_from), but only pixels whose bit is set
    /// in `and_mask` are copied. The mask has one bit per pixel of
    /// `dst_rect`, most significant bit first, each row padded to a whole
    /// byte.
    pub fn overlay(
        &mut self,
        dst_rect: &Rect,
        src: &PixelBuffer,
        src_x: i32,
        src_y: i32,
        and_mask: &[u8],
    ) -> RenderResult<()> {
        self.ensure_same_format(src)?;
        if dst_rect.is_empty() {
            return Ok(());
        }
        let mask_stride = (dst_rect.width() as usize).div_ceil(8);
        let mask_len = mask_stride * dst_rect.height() as usize;
        if and_mask.len() < mask_len {
            return Err(RenderError::BufferOverflow);
        }
        let Some((dst, sx, sy)) =
            clip_pair(dst_rect, self.dimension, src_x, src_y, src.dimension)
        else {
            return Ok(());
        };

        let bpp = self.bytes_per_pixel();
        let (dst_stride, src_stride) = (self.bytes_per_row(), src.bytes_per_row());
        // Mask coordinates stay relative to the unclipped rectangle.
        let mask_x0 = (dst.left - dst_rect.left) as usize;
        let mask_y0 = (dst.top - dst_rect.top) as usize;
        let src_bytes = src.bytes()?;
        let dst_bytes = self.bytes_mut()?;
        for row in 0..dst.height() as usize {
            let mask_row = &and_mask[(mask_y0 + row) * mask_stride..][..mask_stride];
            for col in 0..dst.width() as usize {
                let bit = mask_x0 + col;
                if mask_row[bit / 8] & (0x80 >> (bit % 8)) == 0 {
                    continue;
                }
                let d = (index(dst.top) + row) * dst_stride + (index(dst.left) + col) * bpp;
                let s = (index(sy) + row) * src_stride + (index(sx) + col) * bpp;
                dst_bytes[d..d + bpp].copy_from_slice(&src_bytes[s..s + bpp]);
            }
        }
        Ok(())
    }

    /// Move the area starting at `(src_x, src_y)` to `dst_rect` inside this
    /// buffer. Overlapping areas are handled.
    pub fn move_rect(&mut self, dst_rect: &Rect, src_x: i32, src_y: i32) -> RenderResult<()> {
        let Some((dst, sx, sy)) =
            clip_pair(dst_rect, self.dimension, src_x, src_y, self.dimension)
        else {
            return Ok(());
        };

        let bpp = self.bytes_per_pixel();
        let stride = self.bytes_per_row();
        let row_len = dst.width() as usize * bpp;
        let height = dst.height() as usize;
        let bytes = self.bytes_mut()?;
        let mut move_row = |row: usize| {
            let s = (index(sy) + row) * stride + index(sx) * bpp;
            let d = (index(dst.top) + row) * stride + index(dst.left) * bpp;
            bytes.copy_within(s..s + row_len, d);
        };
        // Moving down walks rows bottom-up so source rows are read before
        // they are overwritten.
        if sy < dst.top {
            (0..height).rev().for_each(&mut move_row);
        } else {
            (0..height).for_each(&mut move_row);
        }
        Ok(())
    }

    /// Whether `dst_rect` of this buffer matches the source area starting at
    /// `(src_x, src_y)`. Only the part inside both buffers is compared.
    pub fn cmp_from(
        &self,
        dst_rect: &Rect,
        src: &PixelBuffer,
        src_x: i32,
        src_y: i32,
    ) -> RenderResult<bool> {
        self.ensure_same_format(src)?;
        let Some((dst, sx, sy)) =
            clip_pair(dst_rect, self.dimension, src_x, src_y, src.dimension)
        else {
            return Ok(true);
        };

        let bpp = self.bytes_per_pixel();
        let (dst_stride, src_stride) = (self.bytes_per_row(), src.bytes_per_row());
        let row_len = dst.width() as usize * bpp;
        let dst_bytes = self.bytes()?;
        let src_bytes = src.bytes()?;
        let row_equal = |row: usize| {
            let d = (index(dst.top) + row) * dst_stride + index(dst.left) * bpp;
            let s = (index(sy) + row) * src_stride + index(sx) * bpp;
            dst_bytes[d..d + row_len] == src_bytes[s..s + row_len]
        };

        Ok((0..dst.height() as usize).all(row_equal))
    }

    fn ensure_same_format(&self, other: &PixelBuffer) -> RenderResult<()> {
        if self.pixel_format != other.pixel_format {
            return Err(RenderError::FormatMismatch);
        }
        Ok(())
    }
}

/// Coordinates of rectangles already clamped to a non-negative extent.
#[inline]
fn index(value: i32) -> usize {
    usize::try_from(value).unwrap_or(0)
}

/// Clip `dst_rect` against the destination extent and the matching source
/// area against the source extent. Returns the surviving destination rect
/// and its source origin.
fn clip_pair(
    dst_rect: &Rect,
    dst_extent: Dimension,
    src_x: i32,
    src_y: i32,
    src_extent: Dimension,
) -> Option<(Rect, i32, i32)> {
    let dx = src_x.saturating_sub(dst_rect.left);
    let dy = src_y.saturating_sub(dst_rect.top);
    let dst = dst_rect.clamped_to(dst_extent);
    let src = dst.translated(dx, dy).clamped_to(src_extent);
    let dst = src.translated(-dx, -dy);
    if dst.is_empty() {
        return None;
    }
    Some((dst, src.left, src.top))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(width: u32, height: u32) -> RenderResult<PixelBuffer> {
        PixelBuffer::new(PixelFormat::bgra32(), Dimension::new(width, height))
    }

    fn pixel(buffer: &PixelBuffer, x: i32, y: i32) -> RenderResult<u32> {
        let offset = buffer.offset_of(x, y).ok_or(RenderError::BufferOverflow)?;
        let bytes = buffer.bytes()?;
        Ok(u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]))
    }

    #[test]
    fn layout_accessors_follow_format_and_dimension() -> RenderResult<()> {
        let fb = buffer(10, 3)?;
        assert_eq!(fb.bits_per_pixel(), 32);
        assert_eq!(fb.bytes_per_pixel(), 4);
        assert_eq!(fb.bytes_per_row(), 40);
        assert_eq!(fb.buffer_size(), 120);

        let base = fb.buffer_ptr().ok_or(RenderError::NotInitialized)?;
        assert_eq!(fb.buffer_ptr_at(2, 1), Some(base.wrapping_add(48)));
        assert_eq!(fb.buffer_ptr_at(10, 0), None);
        assert_eq!(fb.buffer_ptr_at(-1, 0), None);
        Ok(())
    }

    #[test]
    fn unbound_buffer_refuses_pixel_access() {
        let mut fb = PixelBuffer::unbound(PixelFormat::bgra32(), Dimension::new(4, 4));
        assert!(!fb.has_buffer());
        assert!(fb.buffer_ptr().is_none());
        assert!(matches!(
            fb.fill_rect(&Rect::new(0, 0, 2, 2), 1),
            Err(RenderError::NotInitialized)
        ));
    }

    #[test]
    fn fill_rect_is_clipped() -> RenderResult<()> {
        let mut fb = buffer(4, 4)?;
        fb.fill_rect(&Rect::new(2, 2, 10, 10), 0x00ff_0000)?;
        assert_eq!(pixel(&fb, 3, 3)?, 0x00ff_0000);
        assert_eq!(pixel(&fb, 2, 2)?, 0x00ff_0000);
        assert_eq!(pixel(&fb, 1, 1)?, 0);
        Ok(())
    }

    #[test]
    fn megapixel_fill_and_compare_finish_on_caller() -> RenderResult<()> {
        let worker = std::thread::Builder::new()
            .name("frame-caller".to_string())
            .spawn(|| -> RenderResult<bool> {
                let expected = PixelFormat::bgra32().pack_rgb(0x10, 0x20, 0x30);
                let mut fb = buffer(1024, 1024)?;
                let mut other = buffer(1024, 1024)?;
                fb.set_color(0x10, 0x20, 0x30)?;
                other.fill_rect(&Rect::new(0, 0, 1024, 1024), expected)?;
                assert_eq!(pixel(&fb, 0, 0)?, expected);
                assert_eq!(pixel(&fb, 1023, 1023)?, expected);
                assert_eq!(pixel(&fb, 511, 700)?, expected);
                fb.cmp_from(&Rect::new(0, 0, 1024, 1024), &other, 0, 0)
            })
            .map_err(|err| RenderError::Platform(err.into()))?;
        let equal = worker
            .join()
            .map_err(|_| RenderError::Platform(anyhow::anyhow!("fill thread panicked")))??;
        assert!(equal);
        Ok(())
    }

    #[test]
    fn big_endian_fill_reverses_bytes() -> RenderResult<()> {
        let format = PixelFormat {
            big_endian: true,
            ..PixelFormat::bgra32()
        };
        let mut fb = PixelBuffer::new(format, Dimension::new(1, 1))?;
        fb.fill_rect(&Rect::new(0, 0, 1, 1), 0x0011_2233)?;
        assert_eq!(fb.bytes()?, &[0x00, 0x11, 0x22, 0x33]);
        Ok(())
    }

    #[test]
    fn copy_from_clips_to_both_buffers() -> RenderResult<()> {
        let mut src = buffer(4, 4)?;
        src.set_color(0, 0, 0xff)?;
        let mut dst = buffer(8, 8)?;

        dst.copy_from(&Rect::new(6, 6, 10, 10), &src, 2, 2)?;

        assert_eq!(pixel(&dst, 6, 6)?, 0xff);
        assert_eq!(pixel(&dst, 7, 7)?, 0xff);
        assert_eq!(pixel(&dst, 5, 5)?, 0);
        Ok(())
    }

    #[test]
    fn copy_between_formats_is_rejected() -> RenderResult<()> {
        let src = PixelBuffer::new(
            PixelFormat {
                red_shift: 0,
                blue_shift: 16,
                ..PixelFormat::bgra32()
            },
            Dimension::new(2, 2),
        )?;
        let mut dst = buffer(2, 2)?;
        assert!(matches!(
            dst.copy_from_all(&src),
            Err(RenderError::FormatMismatch)
        ));
        Ok(())
    }

    #[test]
    fn copy_from_all_makes_buffers_equal() -> RenderResult<()> {
        let mut src = buffer(3, 3)?;
        src.fill_rect(&Rect::new(1, 0, 2, 3), 0x0012_3456)?;
        let mut dst = buffer(3, 3)?;
        assert!(!dst.is_equal_to(&src));

        dst.copy_from_all(&src)?;

        assert!(dst.is_equal_to(&src));
        assert!(dst.cmp_from(&Rect::new(0, 0, 3, 3), &src, 0, 0)?);
        Ok(())
    }

    #[test]
    fn overlay_copies_only_masked_pixels() -> RenderResult<()> {
        let mut src = buffer(10, 2)?;
        src.set_color(0xff, 0xff, 0xff)?;
        let mut dst = buffer(10, 2)?;
        // Ten pixels per row need two mask bytes.
        let mask = [0b1000_0001, 0b0100_0000, 0b0000_0000, 0b1000_0000];

        dst.overlay(&Rect::new(0, 0, 10, 2), &src, 0, 0, &mask)?;

        let white = 0x00ff_ffff;
        assert_eq!(pixel(&dst, 0, 0)?, white);
        assert_eq!(pixel(&dst, 1, 0)?, 0);
        assert_eq!(pixel(&dst, 7, 0)?, white);
        assert_eq!(pixel(&dst, 9, 0)?, white);
        assert_eq!(pixel(&dst, 8, 0)?, 0);
        assert_eq!(pixel(&dst, 0, 1)?, 0);
        assert_eq!(pixel(&dst, 8, 1)?, white);
        Ok(())
    }

    #[test]
    fn overlay_rejects_short_mask() -> RenderResult<()> {
        let src = buffer(8, 2)?;
        let mut dst = buffer(8, 2)?;
        assert!(matches!(
            dst.overlay(&Rect::new(0, 0, 8, 2), &src, 0, 0, &[0xff]),
            Err(RenderError::BufferOverflow)
        ));
        Ok(())
    }

    #[test]
    fn move_rect_handles_downward_overlap() -> RenderResult<()> {
        let mut fb = buffer(1, 4)?;
        for y in 0..4 {
            fb.fill_rect(&Rect::new(0, y, 1, y + 1), y as u32 + 1)?;
        }

        fb.move_rect(&Rect::new(0, 1, 1, 4), 0, 0)?;

        let column: Vec<u32> = (0..4).map(|y| pixel(&fb, 0, y)).collect::<RenderResult<_>>()?;
        assert_eq!(column, vec![1, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn move_rect_handles_upward_overlap() -> RenderResult<()> {
        let mut fb = buffer(4, 1)?;
        for x in 0..4 {
            fb.fill_rect(&Rect::new(x, 0, x + 1, 1), x as u32 + 1)?;
        }

        fb.move_rect(&Rect::new(0, 0, 3, 1), 1, 0)?;

        let row: Vec<u32> = (0..4).map(|x| pixel(&fb, x, 0)).collect::<RenderResult<_>>()?;
        assert_eq!(row, vec![2, 3, 4, 4]);
        Ok(())
    }

    #[test]
    fn cmp_from_detects_single_pixel_difference() -> RenderResult<()> {
        let a = buffer(8, 8)?;
        let mut b = buffer(8, 8)?;
        b.fill_rect(&Rect::new(5, 5, 6, 6), 7)?;

        assert!(a.cmp_from(&Rect::new(0, 0, 4, 4), &b, 0, 0)?);
        assert!(!a.cmp_from(&Rect::new(0, 0, 8, 8), &b, 0, 0)?);
        Ok(())
    }

    #[test]
    fn bind_aliases_backend_memory() -> RenderResult<()> {
        let mut backing = vec![0u8; 16];
        let ptr = std::ptr::NonNull::new(backing.as_mut_ptr()).ok_or(RenderError::BufferOverflow)?;
        let view = unsafe { BackendBuffer::from_raw_parts(ptr, backing.len()) };
        let mut fb = PixelBuffer::unbound(PixelFormat::bgra32(), Dimension::new(2, 2));

        unsafe { fb.bind(view)? };
        fb.fill_rect(&Rect::new(1, 1, 2, 2), 0x0102_0304)?;
        assert_eq!(fb.buffer_ptr(), Some(view.as_ptr().cast_const()));
        fb.unbind();

        assert_eq!(&backing[12..], &[0x04, 0x03, 0x02, 0x01]);
        Ok(())
    }

    #[test]
    fn bind_rejects_short_backend_memory() -> RenderResult<()> {
        let mut backing = vec![0u8; 8];
        let ptr = std::ptr::NonNull::new(backing.as_mut_ptr()).ok_or(RenderError::BufferOverflow)?;
        let view = unsafe { BackendBuffer::from_raw_parts(ptr, backing.len()) };
        let mut fb = PixelBuffer::unbound(PixelFormat::bgra32(), Dimension::new(2, 2));
        assert!(matches!(unsafe { fb.bind(view) }, Err(RenderError::BufferOverflow)));
        Ok(())
    }
}
