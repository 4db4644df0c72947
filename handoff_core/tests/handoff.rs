// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Painter and presenter on separate threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use handoff_core::bridge::{FlushOutcome, FrameError, LayerBridge, SoftwareLayer};
use handoff_core::config::HandoffConfig;
use handoff_core::device::software::SoftwareDevice;
use handoff_core::format::Color;
use handoff_core::geometry::PhysicalSize;
use handoff_core::ring::{RingError, SlotIndex};
use kurbo::Size;
use parking_lot::Mutex;

type Layer = Arc<Mutex<SoftwareLayer<SoftwareDevice>>>;

fn bridge(slots: usize) -> (Layer, Arc<LayerBridge<SoftwareDevice>>) {
    let device = Arc::new(SoftwareDevice::new());
    let layer = Arc::new(Mutex::new(SoftwareLayer::new(
        device.clone(),
        PhysicalSize::new(8, 8),
    )));
    let mut config = HandoffConfig::default();
    config.ring.slots = slots;
    let bridge = LayerBridge::new(device, Box::new(layer.clone()), &config).unwrap();
    (layer, Arc::new(bridge))
}

fn shade(k: u32) -> Color {
    let v = (k % 255) as f32 / 255.0;
    Color::new(v, 1.0 - v, 0.5, 1.0)
}

fn paint_loop(bridge: &LayerBridge<SoftwareDevice>, frames: u32) -> u32 {
    let mut painted = 0;
    for k in 0..frames {
        let result = bridge.paint(Size::new(8.0, 8.0), |frame| {
            frame.surface().clear(shade(k)).unwrap();
        });
        match result {
            Ok(()) => painted += 1,
            Err(FrameError::Ring(RingError::SlotInFlight { .. })) => thread::yield_now(),
            Err(e) => panic!("frame {k}: {e}"),
        }
    }
    painted
}

#[test]
fn presenter_shows_the_last_frame() {
    for slots in [2, 3] {
        let (layer, bridge) = bridge(slots);
        let done = Arc::new(AtomicBool::new(false));

        let presenter = {
            let bridge = bridge.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut presented = 0_u32;
                while !done.load(Ordering::Acquire) {
                    if bridge.flush() == FlushOutcome::Presented {
                        presented += 1;
                    }
                    thread::yield_now();
                }
                presented
            })
        };

        let frames = 300;
        let painted = paint_loop(&bridge, frames);
        done.store(true, Ordering::Release);
        let presented = presenter.join().unwrap();
        assert!(painted > 0);
        assert!(presented <= painted);

        // Whatever the presenter missed, the final flush catches up.
        let last = bridge.flush();
        assert!(matches!(last, FlushOutcome::Presented | FlushOutcome::Clean));
        assert_eq!(bridge.flush(), FlushOutcome::Clean);

        let expected = shade(frames - 1).encode(handoff_core::format::PixelFormat::RgbaPre);
        let px = layer.lock().pixels().unwrap();
        assert!(px.chunks(4).all(|p| p == expected.as_slice()));

        // Every hold has been dropped.
        let ring = bridge.ring();
        assert!((0..slots).all(|k| ring.is_slot_available(SlotIndex::new(k))));
    }
}

#[test]
fn tear_down_from_another_thread_is_clean() {
    let (layer, bridge) = bridge(3);
    let presenter = {
        let bridge = bridge.clone();
        thread::spawn(move || {
            while !bridge.is_torn_down() {
                let _ = bridge.flush();
                thread::yield_now();
            }
            bridge.flush()
        })
    };

    let mut k = 0;
    loop {
        match bridge.paint(Size::new(8.0, 8.0), |frame| {
            frame.surface().clear(shade(k)).unwrap();
        }) {
            Ok(()) | Err(FrameError::Ring(_)) => {}
            Err(FrameError::TornDown) => break,
            Err(e) => panic!("{e}"),
        }
        k += 1;
        if k == 50 {
            bridge.tear_down();
        }
    }

    assert_eq!(presenter.join().unwrap(), FlushOutcome::NothingToPresent);
    let presents = layer.lock().presents();
    assert!(presents <= 50);
    assert_eq!(bridge.flush(), FlushOutcome::NothingToPresent);
    assert_eq!(layer.lock().presents(), presents);
}
