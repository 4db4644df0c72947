// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Export to Chrome's trace viewer.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! Painter activity lands on thread 0: each stretch in the `Painting` state
//! becomes a duration slice, binds and overruns become instants. Presenter
//! activity (flushes, blits, fallbacks) lands on thread 1.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use handoff_core::bridge::FrameState;
use serde_json::{Value, json};

use crate::recorder::{RecordedEvent, decode};

const PAINTER_TID: u32 = 0;
const PRESENTER_TID: u32 = 1;

/// Converts a recording into a JSON array of trace events.
///
/// Open the result in [Perfetto](https://ui.perfetto.dev/) or
/// `chrome://tracing`. Bytes after the first undecodable record are ignored.
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for record in decode(bytes) {
        let ts = record.at_us;
        match record.event {
            RecordedEvent::FrameState(e) => {
                let ph = match (e.from, e.to) {
                    (_, FrameState::Painting) => "B",
                    (FrameState::Painting, _) => "E",
                    _ => continue,
                };
                events.push(json!({
                    "ph": ph,
                    "name": "Paint",
                    "cat": "Frame",
                    "ts": ts,
                    "pid": 0,
                    "tid": PAINTER_TID,
                    "args": {
                        "frame_index": e.frame_index,
                        "to": format!("{:?}", e.to),
                    }
                }));
            }
            RecordedEvent::Bind(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Bind",
                    "cat": "Offscreen",
                    "ts": ts,
                    "pid": 0,
                    "tid": PAINTER_TID,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "offscreen": e.offscreen.get(),
                        "width": e.physical.width,
                        "height": e.physical.height,
                        "scale": e.scale,
                        "recreated": e.recreated,
                    }
                }));
            }
            RecordedEvent::Resize(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Resize",
                    "cat": "Offscreen",
                    "ts": ts,
                    "pid": 0,
                    "tid": PAINTER_TID,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "offscreen": e.offscreen.get(),
                        "from": e.from.map(|s| [s.width, s.height]),
                        "to": [e.to.width, e.to.height],
                    }
                }));
            }
            RecordedEvent::ReserveOverrun(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "ReserveOverrun",
                    "cat": "Ring",
                    "ts": ts,
                    "pid": 0,
                    "tid": PAINTER_TID,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "slot": e.slot.get(),
                        "requested": e.requested,
                        "remaining": e.remaining,
                        "capacity": e.capacity,
                    }
                }));
            }
            RecordedEvent::Flush(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Flush",
                    "cat": "Present",
                    "ts": ts,
                    "pid": 0,
                    "tid": PRESENTER_TID,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "slot": e.slot.map(|s| s.get()),
                        "outcome": format!("{:?}", e.outcome),
                    }
                }));
            }
            RecordedEvent::Blit(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Blit",
                    "cat": "Present",
                    "ts": ts,
                    "pid": 0,
                    "tid": PRESENTER_TID,
                    "s": "t",
                    "args": {
                        "frame_index": e.frame_index,
                        "offscreen": e.offscreen.get(),
                        "src": [e.src.width, e.src.height],
                        "dst": [e.dst.x, e.dst.y, e.dst.width, e.dst.height],
                        "scaled": e.scaled,
                    }
                }));
            }
            RecordedEvent::HandoffFallback(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "HandoffFallback",
                    "cat": "Remote",
                    "ts": ts,
                    "pid": 0,
                    "tid": PRESENTER_TID,
                    "s": "p",
                    "args": {
                        "layer": e.layer.0,
                        "error": e.error.to_string(),
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}
