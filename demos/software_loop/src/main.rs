// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Painter and presenter threads sharing a [`LayerBridge`] on the CPU device.
//!
//! The painter animates a bar across a 320x180 layer as fast as the ring
//! lets it; the presenter flushes on a fixed interval. A third of the way
//! through, presentation moves to a layer registered by a simulated
//! compositor; two thirds through, that compositor disconnects and the
//! bridge falls back to the local layer.
//!
//! Handoff events are recorded throughout. The first few are replayed to
//! stdout and the whole run is written to `trace.json` in Chrome Trace
//! Event Format. Set `RUST_LOG=handoff_core=debug` for resize, swap, and
//! fallback diagnostics.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use handoff_core::bridge::{FlushOutcome, Frame, FrameError, LayerBridge, SoftwareLayer};
use handoff_core::config::HandoffConfig;
use handoff_core::device::software::SoftwareDevice;
use handoff_core::format::Color;
use handoff_core::geometry::{PhysicalSize, PixelRect};
use handoff_core::remote::{InProcessLayerHost, SharedTarget};
use handoff_core::ring::RingError;
use handoff_debug::pretty::PrettyPrintSink;
use handoff_debug::recorder::{RecorderSink, decode};
use kurbo::Size;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

const FRAME_COUNT: u32 = 240;
const LAYER_SIZE: PhysicalSize = PhysicalSize::new(320, 180);
const PAINT_INTERVAL: Duration = Duration::from_millis(2);
const PRESENT_INTERVAL: Duration = Duration::from_millis(5);
const REPLAYED_EVENTS: usize = 12;
const BAR: Color = Color::new(0.95, 0.55, 0.1, 1.0);

type Layer = Arc<Mutex<SoftwareLayer<SoftwareDevice>>>;

#[derive(Debug, Default)]
struct PresenterStats {
    presented: u32,
    clean: u32,
    busy: u32,
    nothing: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // -- setup -------------------------------------------------------------
    let config = HandoffConfig::load_or_default();
    let device = Arc::new(SoftwareDevice::new());
    device.set_allocation_budget(config.software.allocation_budget);

    let local: Layer = Arc::new(Mutex::new(SoftwareLayer::new(device.clone(), LAYER_SIZE)));
    let bridge = Arc::new(
        LayerBridge::new(device.clone(), Box::new(local.clone()), &config)
            .expect("invalid handoff configuration"),
    );
    let recorder = Arc::new(Mutex::new(RecorderSink::new()));
    bridge.set_trace_sink(recorder.clone());

    // A second layer standing in for another process's compositor.
    let host = InProcessLayerHost::new();
    let remote: Layer = Arc::new(Mutex::new(SoftwareLayer::new(
        device.clone(),
        PhysicalSize::new(LAYER_SIZE.width / 2, LAYER_SIZE.height / 2),
    )));
    let shared: SharedTarget<SoftwareDevice> = remote.clone();
    let handle = host.register("compositor", &shared);

    // -- presenter ---------------------------------------------------------
    let done = Arc::new(AtomicBool::new(false));
    let presenter = {
        let bridge = bridge.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut stats = PresenterStats::default();
            while !done.load(Ordering::Acquire) {
                match bridge.flush() {
                    FlushOutcome::Presented => stats.presented += 1,
                    FlushOutcome::Clean => stats.clean += 1,
                    FlushOutcome::Busy => stats.busy += 1,
                    FlushOutcome::NothingToPresent => stats.nothing += 1,
                }
                thread::sleep(PRESENT_INTERVAL);
            }
            stats
        })
    };

    // -- painter -----------------------------------------------------------
    let content = Size::new(f64::from(LAYER_SIZE.width), f64::from(LAYER_SIZE.height));
    let background = config.surface.background_color();
    let (mut painted, mut skipped) = (0_u32, 0_u32);
    for k in 0..FRAME_COUNT {
        if k == FRAME_COUNT / 3 {
            let mode = bridge.attach_remote(&handle, &host);
            tracing::info!(?mode, "compositor attached");
        }
        if k == 2 * FRAME_COUNT / 3 {
            host.disconnect("compositor");
            let mode = bridge.attach_remote(&handle, &host);
            tracing::info!(?mode, "compositor disconnected");
        }
        match bridge.paint(content, |frame| draw(frame, k, background)) {
            Ok(()) => painted += 1,
            Err(FrameError::Ring(RingError::SlotInFlight { .. })) => skipped += 1,
            Err(e) => tracing::warn!(frame = k, %e, "frame failed"),
        }
        thread::sleep(PAINT_INTERVAL);
    }

    done.store(true, Ordering::Release);
    let stats = presenter.join().expect("presenter thread panicked");
    let last = bridge.flush();
    bridge.tear_down();
    drop(bridge.take_trace_sink());

    tracing::info!(
        painted,
        skipped,
        presented = stats.presented,
        clean = stats.clean,
        busy = stats.busy,
        idle = stats.nothing,
        ?last,
        local_presents = local.lock().presents(),
        remote_presents = remote.lock().presents(),
        "done"
    );

    // -- diagnostics -------------------------------------------------------
    let recording = recorder.lock().as_bytes().to_vec();
    let mut pretty = PrettyPrintSink::new(Box::new(std::io::stdout()));
    for record in decode(&recording).take(REPLAYED_EVENTS) {
        record.event.replay(&mut pretty);
    }

    let path = "trace.json";
    let file = File::create(path).expect("failed to create trace.json");
    let mut writer = BufWriter::new(file);
    handoff_debug::chrome::export(&recording, &mut writer).expect("failed to write Chrome trace");
    println!("Wrote {path} ({FRAME_COUNT} frames, {} bytes recorded)", recording.len());
}

/// Paints a bar that advances three pixels per frame.
///
/// Offscreens are reused between frames, so the whole frame is repainted.
fn draw(frame: &mut Frame<'_, SoftwareDevice>, k: u32, background: Color) {
    let size = frame.physical_size();
    let bar = (size.width / 8).max(1);
    let travel = size.width.saturating_sub(bar).max(1);
    let x = (k * 3) % travel;
    let surface = frame.surface();
    if let Err(e) = surface
        .clear(background)
        .and_then(|()| surface.fill_rect(PixelRect::new(x, 0, bar, size.height), BAR))
    {
        tracing::warn!(%e, "fill failed");
        return;
    }
    // Per-frame uniforms go through the ring.
    if let Err(e) = frame.upload(&[x as f32, k as f32]) {
        tracing::warn!(%e, "uniform upload failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_leaves_no_trail() {
        let device = Arc::new(SoftwareDevice::new());
        let layer: Layer = Arc::new(Mutex::new(SoftwareLayer::new(device.clone(), LAYER_SIZE)));
        let bridge =
            LayerBridge::new(device, Box::new(layer.clone()), &HandoffConfig::default()).unwrap();
        let content = Size::new(f64::from(LAYER_SIZE.width), f64::from(LAYER_SIZE.height));

        // Three frames cycle through both offscreens.
        for k in [0, 10, 20] {
            bridge
                .paint(content, |frame| draw(frame, k, Color::BLACK))
                .unwrap();
            assert_eq!(bridge.flush(), FlushOutcome::Presented);
        }

        let px = layer.lock().pixels().unwrap();
        let row = LAYER_SIZE.width as usize * 4;
        // The last bar starts at x = 60; everything left of it is background.
        for x in 0..60 {
            assert_eq!(&px[x * 4..x * 4 + 4], &[0, 0, 0, 255], "pixel {x}");
        }
        assert_ne!(&px[60 * 4..61 * 4], &[0, 0, 0, 255], "bar is drawn");
        assert_eq!(px.len(), row * LAYER_SIZE.height as usize);
    }
}
