// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::RingError;

/// Index of a ring slot, `0..slot_count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Wraps a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Lifecycle of one ring slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotState {
    /// Reusable.
    Free = 0,
    /// Claimed by the painter for the frame being recorded.
    Writing = 1,
    /// Submitted; waiting for the device and the presenter to let go.
    InFlight = 2,
}

impl SlotState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Writing,
            2 => Self::InFlight,
            _ => Self::Free,
        }
    }
}

/// Outstanding users of an in-flight slot.
const HOLD_DEVICE: u8 = 0b01;
const HOLD_PRESENTER: u8 = 0b10;

/// Coordinates which of N slots the painter may write this frame.
///
/// One painter thread claims the current slot with
/// [`begin_write`](Self::begin_write) and hands it off with
/// [`update_buffer_in_use`](Self::update_buffer_in_use), which advances the
/// current index round-robin. An in-flight slot carries two holds: one
/// dropped by the device when submitted work completes
/// ([`signal_completed`](Self::signal_completed)) and one dropped by the
/// presenter once the frame is shown or superseded
/// ([`signal_presented`](Self::signal_presented)). The slot becomes free when
/// both are gone, from whichever thread drops the last one.
///
/// Share it as `Arc<FrameRing>` between everything that allocates per-frame
/// device memory for one device.
pub struct FrameRing {
    states: Box<[AtomicU8]>,
    holds: Box<[AtomicU8]>,
    current: AtomicUsize,
}

impl fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states: Vec<SlotState> = (0..self.slot_count())
            .map(|k| self.slot_state(SlotIndex(k)))
            .collect();
        f.debug_struct("FrameRing")
            .field("current", &self.current.load(Ordering::Relaxed))
            .field("states", &states)
            .finish()
    }
}

impl FrameRing {
    /// Creates a ring of `slots` free slots; slot 0 is current.
    pub fn new(slots: usize) -> Result<Self, RingError> {
        if slots == 0 || slots > usize::from(u8::MAX) {
            return Err(RingError::InvalidSlotCount(slots));
        }
        Ok(Self {
            states: (0..slots).map(|_| AtomicU8::new(SlotState::Free as u8)).collect(),
            holds: (0..slots).map(|_| AtomicU8::new(0)).collect(),
            current: AtomicUsize::new(0),
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.states.len()
    }

    /// The slot the painter writes next.
    #[must_use]
    pub fn current_buffer_index(&self) -> SlotIndex {
        SlotIndex(self.current.load(Ordering::Acquire))
    }

    /// State of `slot`. Out-of-range slots read as free.
    #[must_use]
    pub fn slot_state(&self, slot: SlotIndex) -> SlotState {
        self.states
            .get(slot.0)
            .map_or(SlotState::Free, |s| SlotState::from_u8(s.load(Ordering::Acquire)))
    }

    /// Returns `true` if nothing in flight references `slot`.
    #[must_use]
    pub fn is_slot_available(&self, slot: SlotIndex) -> bool {
        self.slot_state(slot) == SlotState::Free
    }

    /// Returns `true` if the current slot can be claimed for writing.
    #[must_use]
    pub fn is_buffer_available(&self) -> bool {
        self.is_slot_available(self.current_buffer_index())
    }

    /// Claims the current slot for writing.
    pub fn begin_write(&self) -> Result<SlotIndex, RingError> {
        let slot = self.current_buffer_index();
        match self.states[slot.0].compare_exchange(
            SlotState::Free as u8,
            SlotState::Writing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(slot),
            Err(v) if SlotState::from_u8(v) == SlotState::Writing => {
                Err(RingError::AlreadyWriting { slot })
            }
            Err(_) => Err(RingError::SlotInFlight { slot }),
        }
    }

    /// Marks the slot being written as in flight and advances to the next.
    ///
    /// Returns the slot that was handed off.
    pub fn update_buffer_in_use(&self) -> Result<SlotIndex, RingError> {
        let slot = self.current_buffer_index();
        self.holds[slot.0].store(HOLD_DEVICE | HOLD_PRESENTER, Ordering::Relaxed);
        self.states[slot.0]
            .compare_exchange(
                SlotState::Writing as u8,
                SlotState::InFlight as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| RingError::NotWriting { slot })?;
        self.current
            .store((slot.0 + 1) % self.slot_count(), Ordering::Release);
        Ok(slot)
    }

    /// Abandons a write: returns a `Writing` slot to `Free` without
    /// advancing. Returns `false` if the slot was not being written.
    pub fn release_slot(&self, slot: SlotIndex) -> bool {
        self.states.get(slot.0).is_some_and(|s| {
            s.compare_exchange(
                SlotState::Writing as u8,
                SlotState::Free as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        })
    }

    /// The presenter is done with `slot` (shown or superseded).
    ///
    /// Returns `true` if this freed the slot.
    pub fn signal_presented(&self, slot: SlotIndex) -> bool {
        self.drop_hold(slot, HOLD_PRESENTER)
    }

    /// The device has consumed the work submitted for `slot`.
    ///
    /// Returns `true` if this freed the slot.
    pub fn signal_completed(&self, slot: SlotIndex) -> bool {
        self.drop_hold(slot, HOLD_DEVICE)
    }

    fn drop_hold(&self, slot: SlotIndex, hold: u8) -> bool {
        if self.slot_state(slot) != SlotState::InFlight {
            return false;
        }
        let prev = self.holds[slot.0].fetch_and(!hold, Ordering::AcqRel);
        if prev & hold != 0 && prev & !hold == 0 {
            self.states[slot.0].store(SlotState::Free as u8, Ordering::Release);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_frame(ring: &FrameRing) -> SlotIndex {
        ring.begin_write().unwrap();
        let slot = ring.update_buffer_in_use().unwrap();
        ring.signal_completed(slot);
        ring.signal_presented(slot);
        slot
    }

    #[test]
    fn slots_rotate_round_robin() {
        let ring = FrameRing::new(3).unwrap();
        let order: Vec<usize> = (0..7).map(|_| complete_frame(&ring).get()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn slot_needs_both_holds_dropped() {
        let ring = FrameRing::new(2).unwrap();
        ring.begin_write().unwrap();
        let slot = ring.update_buffer_in_use().unwrap();
        assert!(!ring.is_slot_available(slot));
        assert!(!ring.signal_completed(slot));
        assert!(!ring.is_slot_available(slot));
        // A repeated device signal must not count as the presenter's.
        assert!(!ring.signal_completed(slot));
        assert!(!ring.is_slot_available(slot));
        assert!(ring.signal_presented(slot));
        assert!(ring.is_slot_available(slot));
    }

    #[test]
    fn writer_cannot_lap_the_presenter() {
        let ring = FrameRing::new(2).unwrap();
        ring.begin_write().unwrap();
        let first = ring.update_buffer_in_use().unwrap();
        ring.begin_write().unwrap();
        ring.update_buffer_in_use().unwrap();
        assert_eq!(ring.current_buffer_index(), first);
        assert!(!ring.is_buffer_available());
        assert_eq!(
            ring.begin_write(),
            Err(RingError::SlotInFlight { slot: first })
        );
    }

    #[test]
    fn abandoned_write_frees_without_advancing() {
        let ring = FrameRing::new(3).unwrap();
        let slot = ring.begin_write().unwrap();
        assert_eq!(
            ring.begin_write(),
            Err(RingError::AlreadyWriting { slot })
        );
        assert!(ring.release_slot(slot));
        assert_eq!(ring.current_buffer_index(), slot);
        assert!(ring.is_buffer_available());
    }

    #[test]
    fn handoff_without_write_is_rejected() {
        let ring = FrameRing::new(3).unwrap();
        assert!(matches!(
            ring.update_buffer_in_use(),
            Err(RingError::NotWriting { .. })
        ));
        assert_eq!(ring.current_buffer_index().get(), 0);
    }

    #[test]
    fn zero_slots_is_invalid() {
        assert!(matches!(
            FrameRing::new(0),
            Err(RingError::InvalidSlotCount(0))
        ));
    }
}
