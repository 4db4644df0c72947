// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Device contract for graphics backends.
//!
//! Every backend (CPU, wgpu, ...) implements [`Device`]. Resources are named
//! by opaque integer handles ([`TextureId`], [`BufferId`], [`PipelineId`])
//! and their lifetime is explicit: whatever `create_*` hands out must be
//! returned through the matching `release_*`. Nothing is reclaimed
//! implicitly.
//!
//! All methods take `&self`. A device is shared between the painter and
//! presenter threads and synchronizes internally.
//!
//! # Submission
//!
//! Recorded work is handed to the device with [`Device::submit`]. The
//! callback passed there runs once the device has actually consumed the
//! work, which may be long after `submit` returns. Ring-buffer slot reuse is
//! gated on that callback.

use core::fmt;

use crate::format::{Color, PixelFormat, PixelLayout};
use crate::geometry::{PhysicalSize, PixelRect};
use crate::resource::pipeline::PipelineKey;

pub mod software;

/// Opaque handle to a device texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

/// Opaque handle to a device buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

/// Opaque handle to a compiled pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u64);

macro_rules! handle_impls {
    ($($ty:ident),*) => {$(
        impl $ty {
            /// Wraps a backend-assigned raw value.
            #[inline]
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The backend-assigned raw value.
            #[inline]
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self.0)
            }
        }
    )*};
}

handle_impls!(TextureId, BufferId, PipelineId);

/// What a texture is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Single-sample color target that can also be sampled and copied.
    Color,
    /// Depth attachment.
    Depth,
    /// Multisampled color target, resolved into a [`Color`](Self::Color)
    /// texture before sampling.
    MsaaColor {
        /// Sample count (greater than one).
        samples: u32,
    },
}

/// Parameters for [`Device::create_texture`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Extent in pixels.
    pub size: PhysicalSize,
    /// Pixel format.
    pub format: PixelFormat,
    /// Intended usage.
    pub usage: TextureUsage,
    /// Whether a mip chain is allocated.
    pub mipmapped: bool,
}

impl TextureDesc {
    /// A single-sample, non-mipmapped color texture.
    #[must_use]
    pub const fn color(size: PhysicalSize, format: PixelFormat) -> Self {
        Self {
            size,
            format,
            usage: TextureUsage::Color,
            mipmapped: false,
        }
    }

    /// Sample count implied by the usage.
    #[must_use]
    pub const fn samples(&self) -> u32 {
        match self.usage {
            TextureUsage::MsaaColor { samples } => samples,
            TextureUsage::Color | TextureUsage::Depth => 1,
        }
    }

    /// Approximate number of device bytes the texture occupies.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        let base = self
            .format
            .packed_len(self.size.width, self.size.height) as u64;
        let base = base * u64::from(self.samples());
        // A full mip chain adds at most a third.
        if self.mipmapped { base + base / 3 } else { base }
    }
}

/// Limits and alignment requirements reported by a device at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Required alignment of uniform-buffer offsets, in bytes.
    pub uniform_offset_alignment: u64,
    /// Required alignment of copy offsets, in bytes.
    pub copy_offset_alignment: u64,
    /// Largest texture edge in pixels.
    pub max_texture_dimension: u32,
    /// Largest buffer in bytes.
    pub max_buffer_size: u64,
    /// Largest supported MSAA sample count.
    pub max_samples: u32,
}

impl DeviceCaps {
    /// The strictest offset alignment across all buffer uses.
    #[must_use]
    pub fn buffer_alignment(&self) -> u64 {
        self.uniform_offset_alignment
            .max(self.copy_offset_alignment)
            .max(1)
    }
}

/// Errors reported by a [`Device`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device could not allocate the requested resource.
    #[error("device allocation of {requested} bytes failed")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
    },
    /// The requested extent is empty or exceeds the device limit.
    #[error("invalid texture size {size:?} (max dimension {max})")]
    InvalidSize {
        /// Requested size.
        size: PhysicalSize,
        /// Device limit.
        max: u32,
    },
    /// The handle does not name a live texture.
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    /// The handle does not name a live buffer.
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    /// A rectangle or byte range falls outside the resource.
    #[error("region out of bounds")]
    OutOfBounds,
    /// The caller's source data is shorter than the layout requires.
    #[error("source data too short: need {needed} bytes, got {got}")]
    SourceTooShort {
        /// Bytes required.
        needed: usize,
        /// Bytes supplied.
        got: usize,
    },
    /// The operation is not supported for this format or usage.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// The device is gone.
    #[error("device lost")]
    Lost,
}

/// Callback invoked once submitted work has been consumed by the device.
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// A graphics device shared by painter and presenter.
pub trait Device: Send + Sync + 'static {
    /// Runtime limits and alignment requirements.
    fn caps(&self) -> DeviceCaps;

    /// Makes the device context current on the calling thread.
    ///
    /// Backends without a per-thread context ignore this.
    fn make_current(&self) {}

    /// Releases the device context from the calling thread.
    fn clear_current(&self) {}

    /// Creates a texture. Contents are undefined until written or cleared.
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, DeviceError>;

    /// Releases a texture. Unknown handles are ignored.
    fn release_texture(&self, id: TextureId);

    /// Uploads `data` into the `dst` region of a texture.
    ///
    /// Source rows start `layout.stride` bytes apart, beginning at
    /// `layout.origin` inside `data`. Bytes are interpreted in the texture's
    /// own format.
    fn write_texture(
        &self,
        id: TextureId,
        dst: PixelRect,
        data: &[u8],
        layout: PixelLayout,
    ) -> Result<(), DeviceError>;

    /// Fills a whole texture with one color.
    fn clear(&self, id: TextureId, color: Color) -> Result<(), DeviceError>;

    /// Fills a region of a texture with one color.
    fn fill_rect(&self, id: TextureId, rect: PixelRect, color: Color) -> Result<(), DeviceError>;

    /// Copies `src_rect` of `src` into `dst_rect` of `dst`, scaling when the
    /// extents differ. Also resolves a multisampled source.
    fn blit(
        &self,
        src: TextureId,
        src_rect: PixelRect,
        dst: TextureId,
        dst_rect: PixelRect,
    ) -> Result<(), DeviceError>;

    /// Reads back a region as tightly packed rows in the texture's format.
    fn read_pixels(&self, id: TextureId, rect: PixelRect) -> Result<Vec<u8>, DeviceError>;

    /// Creates a buffer of `size` bytes.
    fn create_buffer(&self, size: u64) -> Result<BufferId, DeviceError>;

    /// Writes `bytes` at `offset` into a buffer.
    fn write_buffer(&self, id: BufferId, offset: u64, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Releases a buffer. Unknown handles are ignored.
    fn release_buffer(&self, id: BufferId);

    /// Builds the pipeline state object for `key`.
    fn create_pipeline(&self, key: &PipelineKey) -> Result<PipelineId, DeviceError>;

    /// Releases a pipeline. Unknown handles are ignored.
    fn release_pipeline(&self, id: PipelineId);

    /// Flushes recorded work. `on_complete` runs once the device is done
    /// with it.
    fn submit(&self, on_complete: CompletionCallback);
}
