// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pixel formats, colors, and source-buffer layouts.
//!
//! The format tag passed alongside pixel bytes is trusted: callers must match
//! it to the layout of the bytes they hand over. Mismatches produce garbage
//! pixels, never an error.

/// Layout tag for pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA, premultiplied alpha.
    RgbaPre,
    /// 8-bit BGRA, premultiplied alpha.
    BgraPre,
    /// 8-bit single-channel luminance.
    Gray,
    /// Planar Y, U, V at 4:2:0 subsampling (three planes).
    Yuv420Planar,
    /// Packed YUYV at 4:2:2 subsampling.
    Yuv422Interleaved,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats.
    ///
    /// For planar formats this is the size of one luma sample; use
    /// [`plane_count`](Self::plane_count) to detect them.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::RgbaPre | Self::BgraPre | Self::Depth32Float => 4,
            Self::Gray | Self::Yuv420Planar => 1,
            Self::Yuv422Interleaved => 2,
            Self::Rgba32Float => 16,
        }
    }

    /// Number of separate planes.
    #[must_use]
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Yuv420Planar => 3,
            _ => 1,
        }
    }

    /// Whether color channels are stored premultiplied by alpha.
    #[must_use]
    pub const fn is_premultiplied(self) -> bool {
        matches!(self, Self::RgbaPre | Self::BgraPre)
    }

    /// Whether the format can back a color render target.
    #[must_use]
    pub const fn is_renderable(self) -> bool {
        matches!(self, Self::RgbaPre | Self::BgraPre | Self::Rgba32Float)
    }

    /// Minimum number of bytes in a tightly packed `width x height` image.
    #[must_use]
    pub const fn packed_len(self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize * self.bytes_per_pixel();
        match self {
            // Two quarter-size chroma planes follow the luma plane.
            Self::Yuv420Planar => {
                let cw = (width as usize).div_ceil(2);
                let ch = (height as usize).div_ceil(2);
                luma + 2 * cw * ch
            }
            _ => luma,
        }
    }
}

/// A straight-alpha RGBA color with `f32` components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Color {
    /// Red.
    pub r: f32,
    /// Green.
    pub g: f32,
    /// Blue.
    pub b: f32,
    /// Alpha.
    pub a: f32,
}

impl Color {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    /// Opaque black.
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    /// Opaque white.
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    /// Creates a color from components.
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from a `[r, g, b, a]` array.
    #[must_use]
    pub const fn from_array(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }

    /// Returns the components as `[r, g, b, a]`.
    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Encodes the color as one pixel of `format`.
    ///
    /// Premultiplies for premultiplied formats. Returns as many bytes as
    /// [`PixelFormat::bytes_per_pixel`]; YUV formats encode luma only.
    #[must_use]
    pub fn encode(self, format: PixelFormat) -> Vec<u8> {
        let a = self.a.clamp(0.0, 1.0);
        let (r, g, b) = if format.is_premultiplied() {
            (self.r * a, self.g * a, self.b * a)
        } else {
            (self.r, self.g, self.b)
        };
        match format {
            PixelFormat::RgbaPre => vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)],
            PixelFormat::BgraPre => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
            PixelFormat::Gray | PixelFormat::Yuv420Planar => vec![unorm8(luma(r, g, b))],
            PixelFormat::Yuv422Interleaved => vec![unorm8(luma(r, g, b)), 128],
            PixelFormat::Rgba32Float => bytemuck::cast_slice(&[r, g, b, a]).to_vec(),
            PixelFormat::Depth32Float => bytemuck::cast_slice(&[r]).to_vec(),
        }
    }
}

fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to 0..=255 before the cast"
)]
fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Describes where an upload's source pixels live in the caller's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    /// Bytes between the starts of consecutive source rows.
    pub stride: usize,
    /// Top-left pixel of the source sub-rectangle within the buffer.
    pub origin: (u32, u32),
}

impl PixelLayout {
    /// A tightly packed layout for rows of `width` pixels of `format`.
    #[must_use]
    pub const fn packed(format: PixelFormat, width: u32) -> Self {
        Self {
            stride: width as usize * format.bytes_per_pixel(),
            origin: (0, 0),
        }
    }

    /// Returns a copy of this layout reading from a different origin.
    #[must_use]
    pub const fn with_origin(self, x: u32, y: u32) -> Self {
        Self {
            stride: self.stride,
            origin: (x, y),
        }
    }

    /// Byte offset of source pixel `(x, y)` relative to the origin.
    #[must_use]
    pub const fn offset_of(self, format: PixelFormat, x: u32, y: u32) -> usize {
        (self.origin.1 as usize + y as usize) * self.stride
            + (self.origin.0 as usize + x as usize) * format.bytes_per_pixel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premultiplied_encoding_scales_color_by_alpha() {
        let half_red = Color::new(1.0, 0.0, 0.0, 0.5);
        assert_eq!(half_red.encode(PixelFormat::RgbaPre), vec![128, 0, 0, 128]);
        assert_eq!(half_red.encode(PixelFormat::BgraPre), vec![0, 0, 128, 128]);
    }

    #[test]
    fn float_encoding_is_sixteen_bytes() {
        assert_eq!(Color::WHITE.encode(PixelFormat::Rgba32Float).len(), 16);
    }

    #[test]
    fn yuv420_packed_len_includes_chroma() {
        // 4x4 luma + two 2x2 chroma planes.
        assert_eq!(PixelFormat::Yuv420Planar.packed_len(4, 4), 16 + 8);
        assert_eq!(PixelFormat::Yuv420Planar.plane_count(), 3);
    }

    #[test]
    fn layout_offsets_honor_stride_and_origin() {
        let layout = PixelLayout {
            stride: 64,
            origin: (2, 1),
        };
        assert_eq!(layout.offset_of(PixelFormat::RgbaPre, 0, 0), 64 + 8);
        assert_eq!(layout.offset_of(PixelFormat::RgbaPre, 1, 2), 3 * 64 + 12);
    }
}
