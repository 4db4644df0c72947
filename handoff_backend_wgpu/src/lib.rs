// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `wgpu` backend for handoff.
//!
//! This crate provides:
//!
//! - [`WgpuDevice`]: the [`Device`](handoff_core::device::Device) contract
//!   over a `wgpu` device and queue, with completion callbacks driven by
//!   [`WgpuDevice::poll`]
//! - [`SurfaceTarget`]: a window swapchain as a
//!   [`PresentTarget`](handoff_core::bridge::PresentTarget)
//!
//! The presenter thread should call [`WgpuDevice::poll`] once per cycle so
//! ring slots are released as the GPU retires frames.

mod device;
mod shader;
mod surface;

pub use device::{BackendError, WgpuDevice, pixel_format, texture_format};
pub use surface::{SurfaceError, SurfaceTarget};
