// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Multi-buffered per-frame device memory.
//!
//! Device work is consumed asynchronously, so a buffer written for frame *n*
//! may still be read while the painter records frame *n + 1*. The ring keeps
//! N (commonly 3) buffers and rotates through them:
//!
//! ```text
//!   slot 0: [presenting]   slot 1: [queued]   slot 2: [writing] ◄── current
//! ```
//!
//! [`FrameRing`] is the slot coordinator: which slot is current and whether
//! it is still referenced by in-flight work. [`RingBuffer`] owns one device
//! buffer per slot and sub-allocates aligned byte ranges from the current one.
//!
//! Running out of room in a slot is a per-frame condition: the caller skips
//! the sub-pass that needed the space and carries on.

mod arena;
mod frame;

pub use arena::{Arena, align_up};
pub use frame::{FrameRing, SlotIndex, SlotState};

use core::fmt;
use std::sync::Arc;

use crate::device::{BufferId, Device, DeviceError};

/// Errors from the ring allocator and slot coordinator.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// Slot count outside `1..=255`.
    #[error("invalid slot count {0}")]
    InvalidSlotCount(usize),
    /// Alignment is not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(u64),
    /// The current slot is still referenced by in-flight work.
    #[error("ring slot {slot:?} is still in flight")]
    SlotInFlight {
        /// The busy slot.
        slot: SlotIndex,
    },
    /// The current slot is already claimed for writing.
    #[error("ring slot {slot:?} is already being written")]
    AlreadyWriting {
        /// The claimed slot.
        slot: SlotIndex,
    },
    /// Hand-off requested for a slot that was never claimed.
    #[error("ring slot {slot:?} is not being written")]
    NotWriting {
        /// The unclaimed slot.
        slot: SlotIndex,
    },
    /// A reservation does not fit in what is left of the current slot.
    #[error(
        "ring capacity overrun: requested {requested} bytes, {remaining} of {capacity} remaining"
    )]
    CapacityOverrun {
        /// Bytes requested (before alignment padding).
        requested: u64,
        /// Bytes left in the slot.
        remaining: u64,
        /// Slot size.
        capacity: u64,
    },
    /// More bytes written than the reservation covers.
    #[error("write of {len} bytes exceeds reservation of {reserved}")]
    WriteOverflow {
        /// Bytes written.
        len: u64,
        /// Bytes reserved.
        reserved: u64,
    },
    /// The device rejected an allocation or write.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// An aligned byte range inside one slot's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Slot the range belongs to.
    pub slot: SlotIndex,
    /// Backing buffer of that slot.
    pub buffer: BufferId,
    /// Aligned start offset.
    pub offset: u64,
    /// Reserved length.
    pub len: u64,
}

impl Reservation {
    /// Exclusive end offset.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// One fixed-size device buffer per ring slot, with an aligned cursor into
/// the current one.
pub struct RingBuffer<D: Device> {
    device: Arc<D>,
    ring: Arc<FrameRing>,
    buffers: Vec<BufferId>,
    arena: Arena,
    alignment: u64,
    active: SlotIndex,
}

impl<D: Device> fmt::Debug for RingBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("buffers", &self.buffers)
            .field("arena", &self.arena)
            .field("alignment", &self.alignment)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl<D: Device> RingBuffer<D> {
    /// Allocates one `slot_size`-byte buffer per slot of `ring`.
    ///
    /// The offset alignment is the device's strictest buffer alignment,
    /// raised to `alignment` if that is larger. Partially created buffers are
    /// released if any allocation fails.
    pub fn new(
        device: Arc<D>,
        ring: Arc<FrameRing>,
        slot_size: u64,
        alignment: Option<u64>,
    ) -> Result<Self, RingError> {
        let alignment = device
            .caps()
            .buffer_alignment()
            .max(alignment.unwrap_or(1));
        if !alignment.is_power_of_two() {
            return Err(RingError::InvalidAlignment(alignment));
        }
        let slot_size = align_up(slot_size, alignment);
        let mut buffers = Vec::with_capacity(ring.slot_count());
        for _ in 0..ring.slot_count() {
            match device.create_buffer(slot_size) {
                Ok(id) => buffers.push(id),
                Err(e) => {
                    for id in buffers {
                        device.release_buffer(id);
                    }
                    return Err(e.into());
                }
            }
        }
        let active = ring.current_buffer_index();
        Ok(Self {
            device,
            ring,
            buffers,
            arena: Arena::new(slot_size),
            alignment,
            active,
        })
    }

    /// Offset alignment every reservation honors.
    #[must_use]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes per slot.
    #[must_use]
    pub fn slot_size(&self) -> u64 {
        self.arena.capacity()
    }

    /// Bytes left in the active slot.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.arena.remaining()
    }

    /// The slot reservations currently come from.
    #[must_use]
    pub fn active_slot(&self) -> SlotIndex {
        self.active
    }

    /// Buffer backing `slot`.
    #[must_use]
    pub fn buffer(&self, slot: SlotIndex) -> Option<BufferId> {
        self.buffers.get(slot.get()).copied()
    }

    /// Starts a frame: switches to the ring's current slot and rewinds the
    /// cursor to zero.
    ///
    /// Fails if that slot is still in flight, in which case nothing changes.
    pub fn reset_offsets(&mut self) -> Result<SlotIndex, RingError> {
        let slot = self.ring.current_buffer_index();
        if self.ring.slot_state(slot) == SlotState::InFlight {
            return Err(RingError::SlotInFlight { slot });
        }
        self.active = slot;
        self.arena.reset();
        Ok(slot)
    }

    /// Reserves `len` bytes in the active slot at an aligned offset.
    ///
    /// Reservations made between two resets never overlap. On overrun the
    /// cursor is left where it was, so smaller requests may still fit.
    pub fn reserve_bytes(&mut self, len: u64) -> Result<Reservation, RingError> {
        let Some(offset) = self.arena.alloc(len, self.alignment) else {
            let err = RingError::CapacityOverrun {
                requested: len,
                remaining: self.arena.remaining(),
                capacity: self.arena.capacity(),
            };
            tracing::warn!(slot = self.active.get(), %err, "skipping sub-pass");
            return Err(err);
        };
        Ok(Reservation {
            slot: self.active,
            buffer: self.buffers[self.active.get()],
            offset,
            len,
        })
    }

    /// Writes `bytes` at the start of a reservation.
    pub fn write(&self, reservation: &Reservation, bytes: &[u8]) -> Result<(), RingError> {
        let len = bytes.len() as u64;
        if len > reservation.len {
            return Err(RingError::WriteOverflow {
                len,
                reserved: reservation.len,
            });
        }
        self.device
            .write_buffer(reservation.buffer, reservation.offset, bytes)?;
        Ok(())
    }

    /// Releases every slot buffer.
    pub fn release(self) {
        drop(self);
    }
}

impl<D: Device> Drop for RingBuffer<D> {
    fn drop(&mut self) {
        for id in self.buffers.drain(..) {
            self.device.release_buffer(id);
        }
    }
}
