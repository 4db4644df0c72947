// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property tests for the frame ring and its sub-allocator.

use std::sync::Arc;

use handoff_core::device::software::SoftwareDevice;
use handoff_core::ring::{FrameRing, Reservation, RingBuffer, RingError};
use proptest::prelude::*;

proptest! {
    #[test]
    fn reservations_are_aligned_and_disjoint(
        sizes in prop::collection::vec(1_u64..300, 1..40),
        align_pow in 0_u32..9,
    ) {
        let device = Arc::new(SoftwareDevice::new());
        let ring = Arc::new(FrameRing::new(3).unwrap());
        let mut rb = RingBuffer::new(device, ring, 2048, Some(1 << align_pow)).unwrap();
        let align = rb.alignment();
        let mut taken: Vec<Reservation> = Vec::new();
        for len in sizes {
            match rb.reserve_bytes(len) {
                Ok(r) => {
                    prop_assert_eq!(r.offset % align, 0);
                    prop_assert!(r.end() <= rb.slot_size());
                    for t in &taken {
                        prop_assert!(r.offset >= t.end() || r.end() <= t.offset);
                    }
                    taken.push(r);
                }
                Err(RingError::CapacityOverrun { requested, .. }) => {
                    prop_assert_eq!(requested, len);
                }
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
        }
    }

    #[test]
    fn slots_are_handed_out_round_robin(slots in 1_usize..8, frames in 1_usize..64) {
        let ring = FrameRing::new(slots).unwrap();
        for k in 0..frames {
            let slot = ring.begin_write().unwrap();
            prop_assert_eq!(slot.get(), k % slots);
            let handed = ring.update_buffer_in_use().unwrap();
            prop_assert_eq!(handed, slot);
            // Device first or presenter first, the last one frees it.
            if k % 2 == 0 {
                prop_assert!(!ring.signal_completed(slot));
                prop_assert!(ring.signal_presented(slot));
            } else {
                prop_assert!(!ring.signal_presented(slot));
                prop_assert!(ring.signal_completed(slot));
            }
        }
    }

    #[test]
    fn in_flight_slots_block_the_writer(slots in 1_usize..6) {
        let ring = FrameRing::new(slots).unwrap();
        for _ in 0..slots {
            ring.begin_write().unwrap();
            ring.update_buffer_in_use().unwrap();
        }
        let blocked = matches!(ring.begin_write(), Err(RingError::SlotInFlight { .. }));
        prop_assert!(blocked);
        prop_assert!(!ring.is_buffer_available());
    }
}
