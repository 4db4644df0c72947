// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use std::sync::Arc;

use super::ResourceError;
use crate::device::{Device, TextureDesc, TextureId};
use crate::format::{PixelFormat, PixelLayout};
use crate::geometry::{PhysicalSize, PixelRect};

/// An owned device texture.
///
/// Ownership moves with the value; the device handle is released by
/// [`release`](Self::release) or on drop, exactly once.
pub struct Texture<D: Device> {
    device: Arc<D>,
    id: TextureId,
    desc: TextureDesc,
}

impl<D: Device> fmt::Debug for Texture<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

impl<D: Device> Texture<D> {
    /// Allocates a texture on `device`.
    pub fn create(device: Arc<D>, desc: TextureDesc) -> Result<Self, ResourceError> {
        let id = device.create_texture(&desc)?;
        Ok(Self { device, id, desc })
    }

    /// Device handle, valid until this value is released.
    #[must_use]
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Creation parameters.
    #[must_use]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Extent in pixels.
    #[must_use]
    pub fn size(&self) -> PhysicalSize {
        self.desc.size
    }

    /// Pixel format.
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    /// Copies the `src_rect` region of `pixels` into `dst_rect`.
    ///
    /// `pixels` is a caller image whose rows start `scan_stride` bytes apart.
    /// Only the destination region is touched, so a sub-region update (a
    /// video frame, a glyph) never re-uploads the whole texture.
    pub fn update(
        &self,
        pixels: &[u8],
        dst_rect: PixelRect,
        src_rect: PixelRect,
        scan_stride: usize,
    ) -> Result<(), ResourceError> {
        if src_rect.size() != dst_rect.size() {
            return Err(ResourceError::RectMismatch {
                src: src_rect,
                dst: dst_rect,
            });
        }
        let layout = PixelLayout {
            stride: scan_stride,
            origin: (src_rect.x, src_rect.y),
        };
        self.device.write_texture(self.id, dst_rect, pixels, layout)?;
        Ok(())
    }

    /// Releases the device texture.
    pub fn release(self) {
        drop(self);
    }
}

impl<D: Device> Drop for Texture<D> {
    fn drop(&mut self) {
        self.device.release_texture(self.id);
    }
}
