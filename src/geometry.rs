use crate::error::{RenderError, RenderResult};

/// Rectangle in pixel coordinates; `right` and `bottom` are exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_size(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            right: left.saturating_add(width),
            bottom: top.saturating_add(height),
        }
    }

    pub const fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub const fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub const fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            left: self.left.saturating_add(dx),
            top: self.top.saturating_add(dy),
            right: self.right.saturating_add(dx),
            bottom: self.bottom.saturating_add(dy),
        }
    }

    /// Intersection of both rectangles. Disjoint inputs give an empty rect
    /// anchored at the clamped origin.
    pub fn intersection(&self, other: &Rect) -> Self {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right).max(left);
        let bottom = self.bottom.min(other.bottom).max(top);
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Clamp to the addressable extent `[0, width) x [0, height)`.
    pub fn clamped_to(&self, extent: Dimension) -> Self {
        self.intersection(&extent.to_rect())
    }

    /// Size this rectangle describes, each side clamped to at least one
    /// pixel.
    pub fn dimension(&self) -> Dimension {
        Dimension::new(
            u32::try_from(self.width()).unwrap_or(0),
            u32::try_from(self.height()).unwrap_or(0),
        )
        .clamped()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Native resources reject zero-sized surfaces.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(
            0,
            0,
            i32::try_from(self.width).unwrap_or(i32::MAX),
            i32::try_from(self.height).unwrap_or(i32::MAX),
        )
    }

    pub fn pixel_count(self) -> RenderResult<usize> {
        usize::try_from(self.width)
            .ok()
            .zip(usize::try_from(self.height).ok())
            .and_then(|(w, h)| w.checked_mul(h))
            .ok_or(RenderError::BufferOverflow)
    }

    pub fn byte_len(self, bytes_per_pixel: usize) -> RenderResult<usize> {
        self.pixel_count()?
            .checked_mul(bytes_per_pixel)
            .ok_or(RenderError::BufferOverflow)
    }
}

/// Pixel layout in the remote-framebuffer sense: packed true-colour with
/// per-channel maxima and bit shifts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub color_depth: u8,
    pub big_endian: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// 32 bits per pixel, little-endian, byte order B, G, R, X. Matches both
    /// a top-down DIB section and `DXGI_FORMAT_B8G8R8A8_UNORM`.
    pub const fn bgra32() -> Self {
        Self {
            bits_per_pixel: 32,
            color_depth: 24,
            big_endian: false,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    pub const fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize).div_ceil(8)
    }

    /// Pack an 8-bit-per-channel colour into this layout.
    pub fn pack_rgb(&self, red: u8, green: u8, blue: u8) -> u32 {
        let channel = |value: u8, max: u16, shift: u8| {
            (u32::from(value) * u32::from(max) / 255)
                .checked_shl(u32::from(shift))
                .unwrap_or(0)
        };
        channel(red, self.red_max, self.red_shift)
            | channel(green, self.green_max, self.green_shift)
            | channel(blue, self.blue_max, self.blue_shift)
    }

    /// The only layout native backends accept is 32 bpp true-colour.
    pub(crate) fn validate_for_backend(&self) -> RenderResult<()> {
        if self.bits_per_pixel != 32 {
            return Err(RenderError::InvalidConfig(format!(
                "backends require 32 bits per pixel, got {}",
                self.bits_per_pixel
            )));
        }
        let fits = |max: u16, shift: u8| {
            u32::from(shift) < 32 && (u64::from(max) << shift) <= u64::from(u32::MAX)
        };
        if !fits(self.red_max, self.red_shift)
            || !fits(self.green_max, self.green_shift)
            || !fits(self.blue_max, self.blue_shift)
        {
            return Err(RenderError::InvalidConfig(
                "colour channels do not fit in 32 bits".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::bgra32()
    }
}
