// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Offscreen surfaces and painter/presenter frame handoff.
//!
//! `handoff_core` lets one thread render frames into an offscreen target
//! while another thread composites the last finished frame onto a
//! presentation layer, without either thread blocking on the other for more
//! than a short swap. Per-frame device memory is multi-buffered so the
//! painter never overwrites data the device is still reading.
//!
//! # Architecture
//!
//! ```text
//!   painter thread                                   presenter thread
//!   ──────────────                                   ────────────────
//!   LayerBridge::paint ──► FrameRing::begin_write
//!        │                 RingBuffer::reset_offsets
//!        ▼
//!   Offscreen::bind_for_size ──► BoundOffscreen (draw, upload)
//!        │
//!        ▼
//!   unbind (dirty) ──► update_buffer_in_use ──► Device::submit
//!        │
//!        ▼
//!   host (swap) ─────────────────────────────► LayerBridge::flush
//!                                                    │
//!                                     try_blit_to ◄──┘
//!                                     PresentTarget::present
//!                                     FrameRing::signal_presented
//! ```
//!
//! **[`device`]**: The [`Device`](device::Device) trait every backend
//! implements, plus a CPU [`SoftwareDevice`](device::software::SoftwareDevice).
//!
//! **[`offscreen`]**: Lazily sized render targets with a dirty flag,
//! reentrant binding, blits, and CPU pixel pushes.
//!
//! **[`surface`]**: Backing stores: color, optional MSAA and depth
//! attachments, created and destroyed together.
//!
//! **[`ring`]**: The N-slot frame ring and its aligned per-frame
//! sub-allocator.
//!
//! **[`resource`]**: Owned textures, per-slot meshes, materials, and the
//! bounded pipeline cache.
//!
//! **[`bridge`]**: The double-buffered handoff between painter and
//! presenter, with a frame state machine and mailbox presentation.
//!
//! **[`remote`]**: Presenting into a layer hosted by another process.
//!
//! **[`config`]**: `handoff.toml` loading and validation.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types
//! for handoff instrumentation, with zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one
//!   branch per call site).

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bridge;
pub mod config;
pub mod context;
pub mod device;
pub mod format;
pub mod geometry;
pub mod offscreen;
pub mod remote;
pub mod resource;
pub mod ring;
pub mod surface;
pub mod trace;
