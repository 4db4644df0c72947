// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr).

use std::io::Write;

use handoff_core::bridge::{FlushOutcome, FrameState};
use handoff_core::geometry::PhysicalSize;
use handoff_core::trace::{
    BindEvent, BlitEvent, FlushEvent, FrameStateEvent, HandoffFallbackEvent, ReserveOverrunEvent,
    ResizeEvent, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write + Send>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns its writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn state_name(state: FrameState) -> &'static str {
    match state {
        FrameState::Idle => "idle",
        FrameState::Painting => "painting",
        FrameState::Finished => "finished",
        FrameState::Presenting => "presenting",
    }
}

fn outcome_name(outcome: FlushOutcome) -> &'static str {
    match outcome {
        FlushOutcome::Presented => "presented",
        FlushOutcome::Clean => "clean",
        FlushOutcome::Busy => "busy",
        FlushOutcome::NothingToPresent => "nothing",
    }
}

fn dims(s: PhysicalSize) -> String {
    format!("{}x{}", s.width, s.height)
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_bind(&mut self, e: &BindEvent) {
        let _ = writeln!(
            self.writer,
            "[bind] frame={} offscreen={} size={} scale={:.2}{}",
            e.frame_index,
            e.offscreen.get(),
            dims(e.physical),
            e.scale,
            if e.recreated { " (new)" } else { "" },
        );
    }

    fn on_resize(&mut self, e: &ResizeEvent) {
        let from = e.from.map_or_else(|| "none".to_owned(), dims);
        let _ = writeln!(
            self.writer,
            "[resize] frame={} offscreen={} {from} -> {}",
            e.frame_index,
            e.offscreen.get(),
            dims(e.to),
        );
    }

    fn on_blit(&mut self, e: &BlitEvent) {
        let _ = writeln!(
            self.writer,
            "[blit] frame={} offscreen={} src={} dst={}x{}+{}+{}{}",
            e.frame_index,
            e.offscreen.get(),
            dims(e.src),
            e.dst.width,
            e.dst.height,
            e.dst.x,
            e.dst.y,
            if e.scaled { " scaled" } else { "" },
        );
    }

    fn on_flush(&mut self, e: &FlushEvent) {
        let frame = e
            .frame_index
            .map_or_else(|| "-".to_owned(), |k| k.to_string());
        let slot = e
            .slot
            .map_or_else(|| "-".to_owned(), |s| s.get().to_string());
        let _ = writeln!(
            self.writer,
            "[flush] frame={frame} slot={slot} {}",
            outcome_name(e.outcome),
        );
    }

    fn on_reserve_overrun(&mut self, e: &ReserveOverrunEvent) {
        let _ = writeln!(
            self.writer,
            "[overrun] frame={} slot={} requested={}B remaining={}B capacity={}B",
            e.frame_index,
            e.slot.get(),
            e.requested,
            e.remaining,
            e.capacity,
        );
    }

    fn on_frame_state(&mut self, e: &FrameStateEvent) {
        let _ = writeln!(
            self.writer,
            "[state] frame={} {} -> {}",
            e.frame_index,
            state_name(e.from),
            state_name(e.to),
        );
    }

    fn on_handoff_fallback(&mut self, e: &HandoffFallbackEvent) {
        let _ = writeln!(
            self.writer,
            "[fallback] layer={} local: {}",
            e.layer.0, e.error,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::context::OffscreenId;
    use handoff_core::remote::{HandoffError, RemoteLayerId};
    use handoff_core::ring::SlotIndex;

    fn printed(f: impl FnOnce(&mut PrettyPrintSink<Vec<u8>>)) -> String {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        f(&mut sink);
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn pretty_print_bind() {
        let output = printed(|sink| {
            sink.on_bind(&BindEvent {
                frame_index: 1,
                offscreen: OffscreenId::from_raw(3),
                physical: PhysicalSize::new(64, 32),
                scale: 2.0,
                recreated: true,
            });
        });
        assert!(output.contains("[bind]"), "got: {output}");
        assert!(output.contains("frame=1"), "got: {output}");
        assert!(output.contains("size=64x32"), "got: {output}");
        assert!(output.contains("(new)"), "got: {output}");
    }

    #[test]
    fn pretty_print_idle_flush() {
        let output = printed(|sink| {
            sink.on_flush(&FlushEvent {
                frame_index: None,
                slot: None,
                outcome: FlushOutcome::NothingToPresent,
            });
            sink.on_flush(&FlushEvent {
                frame_index: Some(7),
                slot: Some(SlotIndex::new(1)),
                outcome: FlushOutcome::Presented,
            });
        });
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines, ["[flush] frame=- slot=- nothing", "[flush] frame=7 slot=1 presented"]);
    }

    #[test]
    fn pretty_print_fallback_names_the_error() {
        let output = printed(|sink| {
            sink.on_handoff_fallback(&HandoffFallbackEvent {
                layer: RemoteLayerId(2),
                error: HandoffError::Disconnected,
            });
            sink.on_frame_state(&FrameStateEvent {
                frame_index: 2,
                from: FrameState::Finished,
                to: FrameState::Idle,
            });
        });
        assert!(output.contains("[fallback] layer=2"), "got: {output}");
        assert!(output.contains("finished -> idle"), "got: {output}");
    }
}
