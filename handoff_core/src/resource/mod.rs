// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU resource wrappers with explicit lifetimes.
//!
//! - [`Texture`] owns one device texture and supports sub-rectangle updates
//!   from strided source images.
//! - [`Mesh`] keeps a vertex/index buffer pair per ring slot so geometry for
//!   the next frame never overwrites buffers the device is still reading.
//! - [`PhongMaterial`] references (never owns) its map textures.
//! - [`PipelineCache`] is the per-device, bounded pipeline cache.
//!
//! Owned wrappers release their device handles on drop; `release(self)` is
//! the explicit spelling.

mod material;
mod mesh;
pub mod pipeline;
mod texture;

pub use material::{MapKind, PhongMaterial};
pub use mesh::{IndexData, IndexFormat, Mesh};
pub use pipeline::{CompositeMode, PipelineCache, PipelineKey};
pub use texture::Texture;

use crate::device::DeviceError;
use crate::geometry::PixelRect;
use crate::ring::SlotIndex;

/// Errors from resource creation and updates.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The ring slot being written is still referenced by in-flight work.
    #[error("ring slot {slot:?} is still in flight")]
    InFlight {
        /// The busy slot.
        slot: SlotIndex,
    },
    /// Source and destination rectangles differ in size.
    #[error("source rect {src:?} does not match destination rect {dst:?}")]
    RectMismatch {
        /// Source region.
        src: PixelRect,
        /// Destination region.
        dst: PixelRect,
    },
    /// The device rejected the operation.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
