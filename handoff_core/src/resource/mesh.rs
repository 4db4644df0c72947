// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use std::sync::Arc;

use super::ResourceError;
use crate::device::{BufferId, Device};
use crate::ring::{FrameRing, SlotIndex, SlotState};

/// Index data for [`Mesh::build_geometry`].
#[derive(Clone, Copy, Debug)]
pub enum IndexData<'a> {
    /// 16-bit indices.
    U16(&'a [u16]),
    /// 32-bit indices.
    U32(&'a [u32]),
}

impl IndexData<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            IndexData::U16(i) => bytemuck::cast_slice(i),
            IndexData::U32(i) => bytemuck::cast_slice(i),
        }
    }

    fn len(&self) -> usize {
        match self {
            IndexData::U16(i) => i.len(),
            IndexData::U32(i) => i.len(),
        }
    }

    fn format(&self) -> IndexFormat {
        match self {
            IndexData::U16(_) => IndexFormat::U16,
            IndexData::U32(_) => IndexFormat::U32,
        }
    }
}

/// Width of the indices stored in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit.
    U16,
    /// 32-bit.
    U32,
}

#[derive(Clone, Copy, Debug)]
struct SizedBuffer {
    id: BufferId,
    capacity: u64,
}

#[derive(Default)]
struct MeshSlot {
    vertices: Option<SizedBuffer>,
    indices: Option<SizedBuffer>,
    index_format: Option<IndexFormat>,
    vertex_count: usize,
    index_count: usize,
}

/// Vertex and index buffers, one pair per ring slot.
///
/// Geometry is written into the current slot only. Slots still referenced
/// by in-flight work are never rebuilt.
pub struct Mesh<D: Device> {
    device: Arc<D>,
    ring: Arc<FrameRing>,
    slots: Vec<MeshSlot>,
}

impl<D: Device> fmt::Debug for Mesh<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl<D: Device> Mesh<D> {
    /// Creates a mesh with no geometry.
    #[must_use]
    pub fn new(device: Arc<D>, ring: Arc<FrameRing>) -> Self {
        let slots = (0..ring.slot_count()).map(|_| MeshSlot::default()).collect();
        Self {
            device,
            ring,
            slots,
        }
    }

    /// Uploads geometry into the current ring slot.
    ///
    /// Buffers are reused when large enough and recreated otherwise. Fails
    /// with [`ResourceError::InFlight`] if the slot's previous contents may
    /// still be read by the device.
    pub fn build_geometry(
        &mut self,
        vertices: &[f32],
        indices: IndexData<'_>,
    ) -> Result<SlotIndex, ResourceError> {
        let slot = self.ring.current_buffer_index();
        if self.ring.slot_state(slot) == SlotState::InFlight {
            return Err(ResourceError::InFlight { slot });
        }
        let device = &*self.device;
        let entry = &mut self.slots[slot.get()];
        upload(device, &mut entry.vertices, bytemuck::cast_slice(vertices))?;
        upload(device, &mut entry.indices, indices.bytes())?;
        entry.index_format = Some(indices.format());
        entry.vertex_count = vertices.len();
        entry.index_count = indices.len();
        Ok(slot)
    }

    /// Vertex buffer of `slot`, if geometry was built there.
    #[must_use]
    pub fn vertex_buffer(&self, slot: SlotIndex) -> Option<BufferId> {
        self.slots.get(slot.get())?.vertices.map(|b| b.id)
    }

    /// Index buffer of `slot`, if geometry was built there.
    #[must_use]
    pub fn index_buffer(&self, slot: SlotIndex) -> Option<BufferId> {
        self.slots.get(slot.get())?.indices.map(|b| b.id)
    }

    /// Index width used in `slot`.
    #[must_use]
    pub fn index_format(&self, slot: SlotIndex) -> Option<IndexFormat> {
        self.slots.get(slot.get())?.index_format
    }

    /// Number of indices in `slot`.
    #[must_use]
    pub fn index_count(&self, slot: SlotIndex) -> usize {
        self.slots.get(slot.get()).map_or(0, |s| s.index_count)
    }

    /// Number of `f32` vertex components in `slot`.
    #[must_use]
    pub fn vertex_count(&self, slot: SlotIndex) -> usize {
        self.slots.get(slot.get()).map_or(0, |s| s.vertex_count)
    }

    /// Releases every per-slot buffer.
    pub fn release(self) {
        drop(self);
    }
}

impl<D: Device> Drop for Mesh<D> {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            for buffer in [slot.vertices.take(), slot.indices.take()].into_iter().flatten() {
                self.device.release_buffer(buffer.id);
            }
        }
    }
}

fn upload<D: Device>(
    device: &D,
    buffer: &mut Option<SizedBuffer>,
    bytes: &[u8],
) -> Result<(), ResourceError> {
    let needed = (bytes.len() as u64).max(4);
    match *buffer {
        Some(existing) if existing.capacity >= needed => {}
        stale => {
            if let Some(old) = stale {
                device.release_buffer(old.id);
                *buffer = None;
            }
            let id = device.create_buffer(needed)?;
            *buffer = Some(SizedBuffer {
                id,
                capacity: needed,
            });
        }
    }
    if let Some(target) = buffer {
        device.write_buffer(target.id, 0, bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    fn setup() -> (Arc<SoftwareDevice>, Arc<FrameRing>) {
        (
            Arc::new(SoftwareDevice::new()),
            Arc::new(FrameRing::new(3).unwrap()),
        )
    }

    #[test]
    fn geometry_lands_in_current_slot() {
        let (device, ring) = setup();
        let mut mesh = Mesh::new(device.clone(), ring);
        let slot = mesh
            .build_geometry(&[0.0, 1.0, 2.0], IndexData::U16(&[0, 1, 2]))
            .unwrap();
        assert_eq!(slot.get(), 0);
        assert_eq!(mesh.index_format(slot), Some(IndexFormat::U16));
        assert_eq!(mesh.index_count(slot), 3);

        let vb = mesh.vertex_buffer(slot).unwrap();
        let bytes = device.buffer_contents(vb).unwrap();
        assert_eq!(&bytes[4..8], &1.0_f32.to_ne_bytes());
    }

    #[test]
    fn in_flight_slot_is_not_rebuilt() {
        let (device, ring) = setup();
        let mut mesh = Mesh::new(device, ring.clone());
        let slot = ring.begin_write().unwrap();
        ring.update_buffer_in_use().unwrap();
        // Wrap back around to the in-flight slot.
        for _ in 1..ring.slot_count() {
            ring.begin_write().unwrap();
            ring.update_buffer_in_use().unwrap();
        }
        assert_eq!(ring.current_buffer_index(), slot);
        let err = mesh
            .build_geometry(&[0.0], IndexData::U32(&[0]))
            .unwrap_err();
        assert!(matches!(err, ResourceError::InFlight { .. }));
    }

    #[test]
    fn release_drops_every_slot() {
        let (device, ring) = setup();
        let mut mesh = Mesh::new(device.clone(), ring.clone());
        mesh.build_geometry(&[0.0; 6], IndexData::U32(&[0, 1]))
            .unwrap();
        ring.begin_write().unwrap();
        ring.update_buffer_in_use().unwrap();
        mesh.build_geometry(&[0.0; 6], IndexData::U16(&[0, 1]))
            .unwrap();
        assert_eq!(device.live_buffers(), 4);
        mesh.release();
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn larger_geometry_recreates_buffers() {
        let (device, ring) = setup();
        let mut mesh = Mesh::new(device.clone(), ring);
        let slot = mesh.build_geometry(&[0.0; 2], IndexData::U16(&[0])).unwrap();
        let small = mesh.vertex_buffer(slot).unwrap();
        mesh.build_geometry(&[0.0; 64], IndexData::U16(&[0])).unwrap();
        assert_ne!(mesh.vertex_buffer(slot), Some(small));
        assert_eq!(device.live_buffers(), 2);
    }
}
