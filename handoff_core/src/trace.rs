// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the painter/presenter handoff.
//!
//! This module provides a [`TraceSink`] trait with one method per event the
//! [`LayerBridge`](crate::bridge::LayerBridge) emits. All method bodies
//! default to no-ops, so implementing only the events you care about is fine.
//!
//! The bridge emits through a [`Tracer`], which borrows the installed sink if
//! there is one. Without the `trace` feature a `Tracer` holds nothing and its
//! methods are empty, so instrumented call sites cost nothing.
//!
//! These events are structured data for tooling. Human-readable diagnostics
//! go through the `tracing` crate independently of this module.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bridge::{FlushOutcome, FrameState};
use crate::context::OffscreenId;
use crate::geometry::{PhysicalSize, PixelRect};
use crate::offscreen::{BindInfo, BlitInfo};
use crate::remote::{HandoffError, RemoteLayerId};
use crate::ring::SlotIndex;

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted after the painter's outermost bind of a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BindEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which offscreen was bound.
    pub offscreen: OffscreenId,
    /// Backing store size.
    pub physical: PhysicalSize,
    /// Scale factor in effect.
    pub scale: f64,
    /// Whether the backing store was allocated by this bind.
    pub recreated: bool,
}

impl BindEvent {
    /// Creates a `BindEvent` from what the bind reported.
    #[must_use]
    pub fn new(frame_index: u64, offscreen: OffscreenId, info: &BindInfo) -> Self {
        Self {
            frame_index,
            offscreen,
            physical: info.physical,
            scale: info.scale.get(),
            recreated: info.recreated,
        }
    }
}

/// Emitted when a bind replaced the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which offscreen was resized.
    pub offscreen: OffscreenId,
    /// Previous size, `None` on first allocation.
    pub from: Option<PhysicalSize>,
    /// New size.
    pub to: PhysicalSize,
}

/// Emitted after the presenter composited an offscreen into its layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlitEvent {
    /// Frame counter of the composited frame.
    pub frame_index: u64,
    /// Source offscreen.
    pub offscreen: OffscreenId,
    /// Source size.
    pub src: PhysicalSize,
    /// Destination region.
    pub dst: PixelRect,
    /// Whether the copy was scaled.
    pub scaled: bool,
}

impl BlitEvent {
    /// Creates a `BlitEvent` from a completed blit.
    #[must_use]
    pub fn new(frame_index: u64, offscreen: OffscreenId, info: &BlitInfo) -> Self {
        Self {
            frame_index,
            offscreen,
            src: info.src,
            dst: info.dst,
            scaled: info.scaled,
        }
    }
}

/// Emitted once per flush attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushEvent {
    /// Frame counter of the frame on glass, if any.
    pub frame_index: Option<u64>,
    /// Ring slot of that frame.
    pub slot: Option<SlotIndex>,
    /// What the flush did.
    pub outcome: FlushOutcome,
}

/// Emitted when a per-frame reservation did not fit its ring slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReserveOverrunEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// The slot that ran out of room.
    pub slot: SlotIndex,
    /// Bytes requested.
    pub requested: u64,
    /// Bytes left in the slot.
    pub remaining: u64,
    /// Slot size.
    pub capacity: u64,
}

/// Emitted when the bridge's frame state machine moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStateEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// State before the transition.
    pub from: FrameState,
    /// State after the transition.
    pub to: FrameState,
}

/// Emitted when a remote layer could not be resolved and presentation fell
/// back to the local layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffFallbackEvent {
    /// The layer that was requested.
    pub layer: RemoteLayerId,
    /// Why resolution failed.
    pub error: HandoffError,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the handoff pipeline.
///
/// Every method defaults to doing nothing; a sink overrides the events it
/// records.
pub trait TraceSink {
    /// Called after the painter binds its offscreen.
    fn on_bind(&mut self, e: &BindEvent) {
        _ = e;
    }

    /// Called when a backing store was replaced.
    fn on_resize(&mut self, e: &ResizeEvent) {
        _ = e;
    }

    /// Called after a blit to the presentation layer.
    fn on_blit(&mut self, e: &BlitEvent) {
        _ = e;
    }

    /// Called once per flush attempt.
    fn on_flush(&mut self, e: &FlushEvent) {
        _ = e;
    }

    /// Called when a ring reservation overran its slot.
    fn on_reserve_overrun(&mut self, e: &ReserveOverrunEvent) {
        _ = e;
    }

    /// Called on every frame state transition.
    fn on_frame_state(&mut self, e: &FrameStateEvent) {
        _ = e;
    }

    /// Called when remote presentation fell back to local.
    fn on_handoff_fallback(&mut self, e: &HandoffFallbackEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// Sink that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

/// A sink shared with whoever installed it, so the events can be read while
/// the bridge still owns its handle.
impl<T: TraceSink + ?Sized> TraceSink for Arc<Mutex<T>> {
    fn on_bind(&mut self, e: &BindEvent) {
        self.lock().on_bind(e);
    }

    fn on_resize(&mut self, e: &ResizeEvent) {
        self.lock().on_resize(e);
    }

    fn on_blit(&mut self, e: &BlitEvent) {
        self.lock().on_blit(e);
    }

    fn on_flush(&mut self, e: &FlushEvent) {
        self.lock().on_flush(e);
    }

    fn on_reserve_overrun(&mut self, e: &ReserveOverrunEvent) {
        self.lock().on_reserve_overrun(e);
    }

    fn on_frame_state(&mut self, e: &FrameStateEvent) {
        self.lock().on_frame_state(e);
    }

    fn on_handoff_fallback(&mut self, e: &HandoffFallbackEvent) {
        self.lock().on_handoff_fallback(e);
    }
}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Borrowed handle to the installed [`TraceSink`], if any.
///
/// With the `trace` feature disabled this is a zero-sized marker and each
/// emit method is empty.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`BindEvent`].
    #[inline]
    pub fn bind(&mut self, e: &BindEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_bind(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ResizeEvent`].
    #[inline]
    pub fn resize(&mut self, e: &ResizeEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_resize(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`BlitEvent`].
    #[inline]
    pub fn blit(&mut self, e: &BlitEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_blit(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FlushEvent`].
    #[inline]
    pub fn flush(&mut self, e: &FlushEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_flush(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ReserveOverrunEvent`].
    #[inline]
    pub fn reserve_overrun(&mut self, e: &ReserveOverrunEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_reserve_overrun(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`FrameStateEvent`].
    #[inline]
    pub fn frame_state(&mut self, e: &FrameStateEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_frame_state(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`HandoffFallbackEvent`].
    #[inline]
    pub fn handoff_fallback(&mut self, e: &HandoffFallbackEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_handoff_fallback(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
