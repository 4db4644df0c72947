// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backing stores for offscreens.
//!
//! A [`Surface`] is immutable in size: a resize destroys it and creates a new
//! one. Its [`Attachments`] (color, optional MSAA color, optional depth) are
//! created and destroyed together.

use kurbo::Size;

use crate::device::{Device, DeviceError, TextureDesc, TextureId, TextureUsage};
use crate::format::{Color, PixelFormat};
use crate::geometry::{PhysicalSize, PixelRect, ScaleFactor};

/// How an offscreen's backing store is laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceConfig {
    /// Color attachment format.
    pub format: PixelFormat,
    /// Requested MSAA sample count; clamped to the device limit.
    pub msaa_samples: u32,
    /// Whether a depth attachment is created.
    pub depth: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::RgbaPre,
            msaa_samples: 1,
            depth: false,
        }
    }
}

/// Device textures backing one surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attachments {
    /// Single-sample color texture; what gets sampled and blitted.
    pub color: TextureId,
    /// Multisampled render target, resolved into `color`.
    pub msaa: Option<TextureId>,
    /// Depth buffer.
    pub depth: Option<TextureId>,
}

impl Attachments {
    /// Creates the full attachment set at `size`.
    ///
    /// If any attachment fails, the ones already created are released and
    /// the error is returned. New attachments are cleared, color to
    /// `background` and depth to the far plane, since device memory may hold
    /// stale contents.
    pub fn allocate<D: Device>(
        device: &D,
        size: PhysicalSize,
        config: &SurfaceConfig,
        background: Color,
    ) -> Result<Self, DeviceError> {
        let color = device.create_texture(&TextureDesc::color(size, config.format))?;
        let mut created = Self {
            color,
            msaa: None,
            depth: None,
        };
        match created.allocate_rest(device, size, config, background) {
            Ok(()) => Ok(created),
            Err(e) => {
                created.release(device);
                Err(e)
            }
        }
    }

    fn allocate_rest<D: Device>(
        &mut self,
        device: &D,
        size: PhysicalSize,
        config: &SurfaceConfig,
        background: Color,
    ) -> Result<(), DeviceError> {
        let samples = config.msaa_samples.min(device.caps().max_samples);
        if samples > 1 {
            self.msaa = Some(device.create_texture(&TextureDesc {
                size,
                format: config.format,
                usage: TextureUsage::MsaaColor { samples },
                mipmapped: false,
            })?);
        }
        if config.depth {
            self.depth = Some(device.create_texture(&TextureDesc {
                size,
                format: PixelFormat::Depth32Float,
                usage: TextureUsage::Depth,
                mipmapped: false,
            })?);
        }
        self.clear(device, background)
    }

    /// Texture draws go to: the MSAA target if present, else `color`.
    #[must_use]
    pub fn render_target(&self) -> TextureId {
        self.msaa.unwrap_or(self.color)
    }

    /// Clears color attachments to `color` and depth to 1.0.
    pub fn clear<D: Device>(&self, device: &D, color: Color) -> Result<(), DeviceError> {
        device.clear(self.color, color)?;
        if let Some(msaa) = self.msaa {
            device.clear(msaa, color)?;
        }
        if let Some(depth) = self.depth {
            device.clear(depth, Color::new(1.0, 0.0, 0.0, 0.0))?;
        }
        Ok(())
    }

    /// Resolves the MSAA target into `color`. No-op without MSAA.
    pub fn resolve<D: Device>(&self, device: &D, size: PhysicalSize) -> Result<(), DeviceError> {
        if let Some(msaa) = self.msaa {
            device.blit(msaa, size.bounds(), self.color, size.bounds())?;
        }
        Ok(())
    }

    /// Releases every attachment.
    pub fn release<D: Device>(self, device: &D) {
        for id in [Some(self.color), self.msaa, self.depth].into_iter().flatten() {
            device.release_texture(id);
        }
    }
}

/// A sized backing store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surface {
    physical: PhysicalSize,
    content: Size,
    scale: ScaleFactor,
    attachments: Attachments,
}

impl Surface {
    /// Allocates a backing store of `physical` pixels holding `content`.
    pub fn create<D: Device>(
        device: &D,
        physical: PhysicalSize,
        content: Size,
        scale: ScaleFactor,
        config: &SurfaceConfig,
        background: Color,
    ) -> Result<Self, DeviceError> {
        let attachments = Attachments::allocate(device, physical, config, background)?;
        Ok(Self {
            physical,
            content,
            scale,
            attachments,
        })
    }

    /// Size in device pixels.
    #[must_use]
    pub fn physical_size(&self) -> PhysicalSize {
        self.physical
    }

    /// Logical size.
    #[must_use]
    pub fn content_size(&self) -> Size {
        self.content
    }

    /// Scale the store was sized for.
    #[must_use]
    pub fn scale(&self) -> ScaleFactor {
        self.scale
    }

    /// The whole store as a rectangle.
    #[must_use]
    pub fn bounds(&self) -> PixelRect {
        self.physical.bounds()
    }

    /// Device textures.
    #[must_use]
    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    pub(crate) fn set_content(&mut self, content: Size, scale: ScaleFactor) {
        self.content = content;
        self.scale = scale;
    }

    /// Releases the device textures.
    pub fn destroy<D: Device>(self, device: &D) {
        self.attachments.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    fn config(msaa_samples: u32, depth: bool) -> SurfaceConfig {
        SurfaceConfig {
            msaa_samples,
            depth,
            ..SurfaceConfig::default()
        }
    }

    #[test]
    fn attachments_are_created_together() {
        let device = SoftwareDevice::new();
        let a = Attachments::allocate(
            &device,
            PhysicalSize::new(8, 8),
            &config(4, true),
            Color::TRANSPARENT,
        )
        .unwrap();
        assert!(a.msaa.is_some() && a.depth.is_some());
        assert_eq!(a.render_target(), a.msaa.unwrap());
        assert_eq!(device.live_textures(), 3);
        a.release(&device);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn partial_failure_rolls_back() {
        let device = SoftwareDevice::new();
        // Color and MSAA succeed, depth fails.
        device.fail_allocation_after(2);
        let err = Attachments::allocate(
            &device,
            PhysicalSize::new(8, 8),
            &config(4, true),
            Color::TRANSPARENT,
        );
        assert!(err.is_err());
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn samples_clamp_to_device_limit() {
        let device = SoftwareDevice::new();
        let a = Attachments::allocate(
            &device,
            PhysicalSize::new(2, 2),
            &config(16, false),
            Color::TRANSPARENT,
        )
        .unwrap();
        let msaa = device.texture_desc(a.msaa.unwrap()).unwrap();
        assert_eq!(msaa.samples(), device.caps().max_samples);
    }

    #[test]
    fn new_color_attachment_starts_at_background() {
        let device = SoftwareDevice::new();
        let surface = Surface::create(
            &device,
            PhysicalSize::new(2, 1),
            Size::new(2.0, 1.0),
            ScaleFactor::ONE,
            &SurfaceConfig::default(),
            Color::WHITE,
        )
        .unwrap();
        let px = device
            .read_pixels(surface.attachments().color, surface.bounds())
            .unwrap();
        assert_eq!(px, vec![255; 8]);
    }
}
