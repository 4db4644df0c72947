// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binary recording of handoff events.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as little-endian records, each stamped with the microseconds
//! elapsed since the recorder was created. [`decode`] reads them back as an
//! iterator of [`Record`].
//!
//! Handoff fallbacks store the endpoint name of
//! [`HandoffError::UnknownEndpoint`] length-prefixed; every other record has
//! a fixed size.

use std::time::Instant;

use handoff_core::bridge::{FlushOutcome, FrameState};
use handoff_core::context::OffscreenId;
use handoff_core::geometry::{PhysicalSize, PixelRect};
use handoff_core::remote::{HandoffError, RemoteLayerId};
use handoff_core::ring::SlotIndex;
use handoff_core::trace::{
    BindEvent, BlitEvent, FlushEvent, FrameStateEvent, HandoffFallbackEvent, ReserveOverrunEvent,
    ResizeEvent, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_BIND: u8 = 1;
const TAG_RESIZE: u8 = 2;
const TAG_BLIT: u8 = 3;
const TAG_FLUSH: u8 = 4;
const TAG_RESERVE_OVERRUN: u8 = 5;
const TAG_FRAME_STATE: u8 = 6;
const TAG_HANDOFF_FALLBACK: u8 = 7;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// Appends every event it receives to an in-memory byte log.
#[derive(Debug)]
pub struct RecorderSink {
    buf: Vec<u8>,
    origin: Instant,
}

impl Default for RecorderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderSink {
    /// Creates an empty recorder. Timestamps count from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            origin: Instant::now(),
        }
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn begin(&mut self, tag: u8) {
        let micros = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.write_u8(tag);
        self.write_u64(micros);
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_size(&mut self, s: PhysicalSize) {
        self.write_u32(s.width);
        self.write_u32(s.height);
    }

    fn write_slot(&mut self, slot: SlotIndex) {
        self.write_u64(slot.get() as u64);
    }

    fn write_str(&mut self, s: &str) {
        let len = u32::try_from(s.len()).unwrap_or(u32::MAX);
        self.write_u32(len);
        let bytes = s.as_bytes();
        self.buf
            .extend_from_slice(&bytes[..bytes.len().min(len as usize)]);
    }
}

impl TraceSink for RecorderSink {
    fn on_bind(&mut self, e: &BindEvent) {
        self.begin(TAG_BIND);
        self.write_u64(e.frame_index);
        self.write_u64(e.offscreen.get());
        self.write_size(e.physical);
        self.write_u64(e.scale.to_bits());
        self.write_bool(e.recreated);
    }

    fn on_resize(&mut self, e: &ResizeEvent) {
        self.begin(TAG_RESIZE);
        self.write_u64(e.frame_index);
        self.write_u64(e.offscreen.get());
        self.write_bool(e.from.is_some());
        self.write_size(e.from.unwrap_or(PhysicalSize::ZERO));
        self.write_size(e.to);
    }

    fn on_blit(&mut self, e: &BlitEvent) {
        self.begin(TAG_BLIT);
        self.write_u64(e.frame_index);
        self.write_u64(e.offscreen.get());
        self.write_size(e.src);
        self.write_u32(e.dst.x);
        self.write_u32(e.dst.y);
        self.write_u32(e.dst.width);
        self.write_u32(e.dst.height);
        self.write_bool(e.scaled);
    }

    fn on_flush(&mut self, e: &FlushEvent) {
        self.begin(TAG_FLUSH);
        self.write_option_u64(e.frame_index);
        self.write_option_u64(e.slot.map(|s| s.get() as u64));
        self.write_u8(match e.outcome {
            FlushOutcome::Presented => 0,
            FlushOutcome::Clean => 1,
            FlushOutcome::Busy => 2,
            FlushOutcome::NothingToPresent => 3,
        });
    }

    fn on_reserve_overrun(&mut self, e: &ReserveOverrunEvent) {
        self.begin(TAG_RESERVE_OVERRUN);
        self.write_u64(e.frame_index);
        self.write_slot(e.slot);
        self.write_u64(e.requested);
        self.write_u64(e.remaining);
        self.write_u64(e.capacity);
    }

    fn on_frame_state(&mut self, e: &FrameStateEvent) {
        self.begin(TAG_FRAME_STATE);
        self.write_u64(e.frame_index);
        self.write_u8(e.from as u8);
        self.write_u8(e.to as u8);
    }

    fn on_handoff_fallback(&mut self, e: &HandoffFallbackEvent) {
        self.begin(TAG_HANDOFF_FALLBACK);
        self.write_u32(e.layer.0);
        match &e.error {
            HandoffError::UnknownEndpoint(name) => {
                self.write_u8(0);
                self.write_str(name);
            }
            HandoffError::UnknownLayer(id) => {
                self.write_u8(1);
                self.write_u32(id.0);
            }
            HandoffError::Disconnected => self.write_u8(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    /// A [`BindEvent`].
    Bind(BindEvent),
    /// A [`ResizeEvent`].
    Resize(ResizeEvent),
    /// A [`BlitEvent`].
    Blit(BlitEvent),
    /// A [`FlushEvent`].
    Flush(FlushEvent),
    /// A [`ReserveOverrunEvent`].
    ReserveOverrun(ReserveOverrunEvent),
    /// A [`FrameStateEvent`].
    FrameState(FrameStateEvent),
    /// A [`HandoffFallbackEvent`].
    HandoffFallback(HandoffFallbackEvent),
}

impl RecordedEvent {
    /// Feeds this event to another sink, e.g. a
    /// [`PrettyPrintSink`](crate::pretty::PrettyPrintSink).
    pub fn replay(&self, sink: &mut dyn TraceSink) {
        match self {
            Self::Bind(e) => sink.on_bind(e),
            Self::Resize(e) => sink.on_resize(e),
            Self::Blit(e) => sink.on_blit(e),
            Self::Flush(e) => sink.on_flush(e),
            Self::ReserveOverrun(e) => sink.on_reserve_overrun(e),
            Self::FrameState(e) => sink.on_frame_state(e),
            Self::HandoffFallback(e) => sink.on_handoff_fallback(e),
        }
    }
}

/// One decoded event and when it was recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Microseconds since the recorder was created.
    pub at_us: u64,
    /// The event.
    pub event: RecordedEvent,
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`Record`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_bool(&mut self) -> Option<bool> {
        Some(self.read_u8()? != 0)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_size(&mut self) -> Option<PhysicalSize> {
        Some(PhysicalSize::new(self.read_u32()?, self.read_u32()?))
    }

    fn read_slot(&mut self) -> Option<SlotIndex> {
        Some(SlotIndex::new(usize::try_from(self.read_u64()?).ok()?))
    }

    fn read_str(&mut self) -> Option<String> {
        let len = usize::try_from(self.read_u32()?).ok()?;
        if self.remaining() < len {
            return None;
        }
        let s = String::from_utf8_lossy(&self.data[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        Some(s)
    }

    fn read_frame_state(&mut self) -> Option<FrameState> {
        Some(match self.read_u8()? {
            0 => FrameState::Idle,
            1 => FrameState::Painting,
            2 => FrameState::Finished,
            _ => FrameState::Presenting,
        })
    }

    fn decode_bind(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Bind(BindEvent {
            frame_index: self.read_u64()?,
            offscreen: OffscreenId::from_raw(self.read_u64()?),
            physical: self.read_size()?,
            scale: f64::from_bits(self.read_u64()?),
            recreated: self.read_bool()?,
        }))
    }

    fn decode_resize(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let offscreen = OffscreenId::from_raw(self.read_u64()?);
        let had_previous = self.read_bool()?;
        let from = self.read_size()?;
        Some(RecordedEvent::Resize(ResizeEvent {
            frame_index,
            offscreen,
            from: had_previous.then_some(from),
            to: self.read_size()?,
        }))
    }

    fn decode_blit(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Blit(BlitEvent {
            frame_index: self.read_u64()?,
            offscreen: OffscreenId::from_raw(self.read_u64()?),
            src: self.read_size()?,
            dst: PixelRect::new(
                self.read_u32()?,
                self.read_u32()?,
                self.read_u32()?,
                self.read_u32()?,
            ),
            scaled: self.read_bool()?,
        }))
    }

    fn decode_flush(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_option_u64()?;
        let slot = match self.read_option_u64()? {
            Some(raw) => Some(SlotIndex::new(usize::try_from(raw).ok()?)),
            None => None,
        };
        let outcome = match self.read_u8()? {
            0 => FlushOutcome::Presented,
            1 => FlushOutcome::Clean,
            2 => FlushOutcome::Busy,
            _ => FlushOutcome::NothingToPresent,
        };
        Some(RecordedEvent::Flush(FlushEvent {
            frame_index,
            slot,
            outcome,
        }))
    }

    fn decode_reserve_overrun(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::ReserveOverrun(ReserveOverrunEvent {
            frame_index: self.read_u64()?,
            slot: self.read_slot()?,
            requested: self.read_u64()?,
            remaining: self.read_u64()?,
            capacity: self.read_u64()?,
        }))
    }

    fn decode_frame_state(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FrameState(FrameStateEvent {
            frame_index: self.read_u64()?,
            from: self.read_frame_state()?,
            to: self.read_frame_state()?,
        }))
    }

    fn decode_handoff_fallback(&mut self) -> Option<RecordedEvent> {
        let layer = RemoteLayerId(self.read_u32()?);
        let error = match self.read_u8()? {
            0 => HandoffError::UnknownEndpoint(self.read_str()?),
            1 => HandoffError::UnknownLayer(RemoteLayerId(self.read_u32()?)),
            _ => HandoffError::Disconnected,
        };
        Some(RecordedEvent::HandoffFallback(HandoffFallbackEvent {
            layer,
            error,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        let at_us = self.read_u64()?;
        let event = match tag {
            TAG_BIND => self.decode_bind(),
            TAG_RESIZE => self.decode_resize(),
            TAG_BLIT => self.decode_blit(),
            TAG_FLUSH => self.decode_flush(),
            TAG_RESERVE_OVERRUN => self.decode_reserve_overrun(),
            TAG_FRAME_STATE => self.decode_frame_state(),
            TAG_HANDOFF_FALLBACK => self.decode_handoff_fallback(),
            _ => None, // unknown tag → stop iteration
        }?;
        Some(Record { at_us, event })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
