// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Window surfaces as presentation layers.

use core::fmt;
use std::sync::Arc;

use handoff_core::bridge::PresentTarget;
use handoff_core::device::TextureId;
use handoff_core::format::PixelFormat;
use handoff_core::geometry::PhysicalSize;

use crate::device::{WgpuDevice, pixel_format};

/// Errors raised while wrapping a surface.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// The configured swapchain format has no matching [`PixelFormat`].
    #[error("unsupported surface format {0:?}")]
    UnsupportedFormat(wgpu::TextureFormat),
}

/// A [`PresentTarget`] that composites into a window's swapchain.
///
/// [`drawable`](PresentTarget::drawable) acquires the next swapchain frame
/// (once per cycle) and [`present`](PresentTarget::present) queues it for
/// display. An outdated or lost swapchain is reconfigured and the cycle is
/// skipped.
pub struct SurfaceTarget {
    device: Arc<WgpuDevice>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    format: PixelFormat,
    current: Option<(TextureId, PhysicalSize)>,
    presents: u64,
}

impl fmt::Debug for SurfaceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceTarget")
            .field("format", &self.format)
            .field("size", &self.size())
            .field("current", &self.current)
            .field("presents", &self.presents)
            .finish_non_exhaustive()
    }
}

impl SurfaceTarget {
    /// Configures `surface` with `config` and wraps it.
    pub fn new(
        device: Arc<WgpuDevice>,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    ) -> Result<Self, SurfaceError> {
        let format =
            pixel_format(config.format).ok_or(SurfaceError::UnsupportedFormat(config.format))?;
        surface.configure(device.wgpu_device(), &config);
        Ok(Self {
            device,
            surface,
            config,
            format,
            current: None,
            presents: 0,
        })
    }

    /// Swapchain extent.
    #[must_use]
    pub fn size(&self) -> PhysicalSize {
        PhysicalSize::new(self.config.width, self.config.height)
    }

    /// Number of frames presented.
    #[must_use]
    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// Reconfigures the swapchain for a new window size.
    ///
    /// Empty sizes are ignored; a minimized window keeps its old swapchain.
    pub fn resize(&mut self, size: PhysicalSize) {
        if size.is_empty() || size == self.size() {
            return;
        }
        self.discard_current();
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(self.device.wgpu_device(), &self.config);
        tracing::debug!(width = size.width, height = size.height, "surface resized");
    }

    fn discard_current(&mut self) {
        if let Some((id, _)) = self.current.take() {
            // Dropping an acquired frame without presenting it discards it.
            drop(self.device.take_surface(id));
        }
    }
}

impl PresentTarget<WgpuDevice> for SurfaceTarget {
    fn drawable(&mut self) -> Option<(TextureId, PhysicalSize)> {
        if self.current.is_some() {
            return self.current;
        }
        match self.surface.get_current_texture() {
            Ok(frame) => {
                let acquired = self.device.import_surface(frame, self.format);
                self.current = Some(acquired);
                Some(acquired)
            }
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                tracing::debug!("swapchain outdated, reconfiguring");
                self.surface.configure(self.device.wgpu_device(), &self.config);
                None
            }
            Err(error) => {
                tracing::warn!(%error, "no swapchain frame this cycle");
                None
            }
        }
    }

    fn present(&mut self) {
        let Some((id, _)) = self.current.take() else {
            return;
        };
        if let Some(frame) = self.device.take_surface(id) {
            frame.present();
            self.presents += 1;
        }
    }
}

impl Drop for SurfaceTarget {
    fn drop(&mut self) {
        self.discard_current();
    }
}
