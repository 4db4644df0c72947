// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Physical sizes, pixel rectangles, and logical→physical scaling.
//!
//! Content sizes are logical and expressed as [`kurbo::Size`]. Backing stores
//! are sized in whole device pixels ([`PhysicalSize`]). [`ScaleFactor`] maps
//! one to the other and always rounds up, so a backing store is never smaller
//! than its content scaled by the active factor.

use core::fmt;

use kurbo::Size;

/// Dimensions of a backing store in device pixels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhysicalSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PhysicalSize {
    /// A zero-sized extent.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a size from pixel dimensions.
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if either dimension is zero.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered by this extent.
    #[inline]
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The rectangle covering this extent, anchored at the origin.
    #[inline]
    #[must_use]
    pub const fn bounds(self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }
}

impl fmt::Debug for PhysicalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle in device pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// Creates a rectangle from its origin and extent.
    #[inline]
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns `true` if the rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    #[inline]
    #[must_use]
    pub const fn right(self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    #[inline]
    #[must_use]
    pub const fn bottom(self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// The extent of this rectangle.
    #[inline]
    #[must_use]
    pub const fn size(self) -> PhysicalSize {
        PhysicalSize::new(self.width, self.height)
    }

    /// Returns `true` if the pixel at `(x, y)` lies inside the rectangle.
    #[must_use]
    pub fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && u64::from(x) < self.right() && u64::from(y) < self.bottom()
    }

    /// Returns `true` if `other` lies entirely within this rectangle.
    #[must_use]
    pub fn contains_rect(self, other: Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Intersection of two rectangles, or `None` if they do not overlap.
    #[must_use]
    pub fn intersect(self, other: Self) -> Option<Self> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if u64::from(x0) >= x1 || u64::from(y0) >= y1 {
            return None;
        }
        // Both extents are bounded by an input width/height, so they fit in u32.
        let width = u32::try_from(x1 - u64::from(x0)).unwrap_or(u32::MAX);
        let height = u32::try_from(y1 - u64::from(y0)).unwrap_or(u32::MAX);
        Some(Self::new(x0, y0, width, height))
    }
}

/// A validated logical→physical scale factor.
///
/// Non-finite or non-positive inputs collapse to `1.0`, matching how window
/// systems report a missing or bogus backing scale.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ScaleFactor(f64);

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::ONE
    }
}

impl ScaleFactor {
    /// The identity scale.
    pub const ONE: Self = Self(1.0);

    /// Creates a scale factor, falling back to `1.0` for unusable values.
    #[must_use]
    pub fn new(scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            Self(scale)
        } else {
            Self::ONE
        }
    }

    /// The raw factor.
    #[inline]
    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }

    /// Physical size needed to hold `content` at this scale.
    ///
    /// Each dimension rounds up so that `physical >= content * scale`.
    /// Negative or non-finite content dimensions map to zero.
    #[must_use]
    pub fn physical_for(self, content: Size) -> PhysicalSize {
        PhysicalSize::new(
            scale_dimension(content.width, self.0),
            scale_dimension(content.height, self.0),
        )
    }

    /// Logical size covered by `physical` pixels at this scale.
    #[must_use]
    pub fn content_for(self, physical: PhysicalSize) -> Size {
        Size::new(
            f64::from(physical.width) / self.0,
            f64::from(physical.height) / self.0,
        )
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is clamped to the u32 range before the cast"
)]
fn scale_dimension(logical: f64, scale: f64) -> u32 {
    let scaled = logical * scale;
    if !scaled.is_finite() || scaled <= 0.0 {
        return 0;
    }
    // Guard against float noise like 100.0 * 1.1 = 110.00000000000001.
    let rounded = (scaled - 1e-9).ceil();
    rounded.clamp(0.0, f64::from(u32::MAX)) as u32
}
