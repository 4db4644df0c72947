// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The offscreen manager: a render target shared by painter and presenter.
//!
//! The painter draws through a [`BoundOffscreen`] scope obtained from
//! [`Offscreen::bind_for_size`]. The presenter samples the finished result
//! with [`Offscreen::texture`] or composites it with one of the blit methods.
//! Both sides go through one reentrant lock per offscreen, so a blit never
//! observes a half-drawn or half-resized backing store, and nested binds on
//! the painter thread never deadlock.
//!
//! ```text
//!   painter                          presenter
//!   ───────                          ─────────
//!   bind_for_size(100x100)  ─┐
//!     clear / fill / upload  │ lock
//!   drop scope  ─────────────┘ dirty = true
//!                                    is_dirty()?  (lock-free)
//!                                    try_blit_to(layer) ─┐ lock
//!                                                        ┘ dirty = false
//! ```
//!
//! Resizing is lazy and destructive: the outermost bind compares the
//! requested physical size with the current backing store and, if they
//! differ, destroys the store and allocates a new one. Scale-factor changes
//! only take effect at that point, never in the middle of a frame.
//!
//! Only one offscreen may be bound per thread. Binding a second one is a
//! programming error that panics in debug builds and is refused with
//! [`OffscreenError::ContextBusy`] in release builds.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kurbo::Size;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::context::{self, OffscreenId};
use crate::device::{Device, DeviceError, TextureId};
use crate::format::{Color, PixelFormat, PixelLayout};
use crate::geometry::{PhysicalSize, PixelRect, ScaleFactor};
use crate::surface::{Attachments, Surface, SurfaceConfig};

/// Errors from binding, drawing into, or blitting an offscreen.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OffscreenError {
    /// Another offscreen is already bound on this thread.
    #[error("offscreen {bound:?} is already bound on this thread")]
    ContextBusy {
        /// The offscreen holding the thread.
        bound: OffscreenId,
    },
    /// The requested size maps to zero pixels.
    #[error("cannot bind an empty backing store ({0:?})")]
    EmptySize(PhysicalSize),
    /// Creating the backing store failed. Nothing is presentable until a
    /// later bind succeeds.
    #[error("backing store allocation failed: {0}")]
    Allocation(DeviceError),
    /// There is no backing store.
    #[error("offscreen has no backing store")]
    NoBackingStore,
    /// The operation is not allowed while the offscreen is bound on the
    /// calling thread.
    #[error("offscreen is bound for drawing on this thread")]
    Bound,
    /// No render target is bound on this thread to blit into.
    #[error("no render target bound on this thread")]
    NoTarget,
    /// A pushed pixel block does not match its destination rectangle.
    #[error("{width}x{height} pixels do not fit destination {dst:?}")]
    RectMismatch {
        /// Source width.
        width: u32,
        /// Source height.
        height: u32,
        /// Destination region.
        dst: PixelRect,
    },
    /// Pixels of this format cannot be converted to the surface format.
    #[error("cannot upload {from:?} pixels into a {to:?} surface")]
    UnsupportedFormat {
        /// Source format.
        from: PixelFormat,
        /// Surface format.
        to: PixelFormat,
    },
    /// A draw or blit was rejected by the device.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// What the outermost bind did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BindInfo {
    /// Backing store size.
    pub physical: PhysicalSize,
    /// Logical content size.
    pub content: Size,
    /// Scale in effect for this bind.
    pub scale: ScaleFactor,
    /// Size of the store that was replaced, if the store was recreated.
    pub previous: Option<PhysicalSize>,
    /// Whether a new backing store was allocated.
    pub recreated: bool,
}

/// Result of a completed blit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlitInfo {
    /// Source size.
    pub src: PhysicalSize,
    /// Destination region.
    pub dst: PixelRect,
    /// Whether the copy was scaled.
    pub scaled: bool,
}

/// Result of a non-blocking blit attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum BlitOutcome {
    /// The contents were composited.
    Blitted(BlitInfo),
    /// The painter holds the offscreen; try again next cycle.
    Busy,
}

/// A block of CPU-rendered pixels entering the compositing pipeline.
#[derive(Clone, Copy, Debug)]
pub struct PixelPush<'a> {
    /// Tightly packed rows of `width * bytes_per_pixel` bytes.
    pub pixels: &'a [u8],
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of `pixels`.
    pub format: PixelFormat,
    /// Horizontal logical→physical scale.
    pub scale_x: f64,
    /// Vertical logical→physical scale.
    pub scale_y: f64,
    /// Target region. `None` replaces the whole store, resizing it to
    /// `width x height`; `Some` updates only that region without resizing.
    pub dst: Option<PixelRect>,
}

impl<'a> PixelPush<'a> {
    /// A full-surface push at scale 1.
    #[must_use]
    pub fn new(pixels: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            scale_x: 1.0,
            scale_y: 1.0,
            dst: None,
        }
    }

    /// Sets the logical→physical scale factors.
    ///
    /// The offscreen keeps one scale factor, so pushes are expected to be
    /// uniform. A non-uniform push still gets the right content size, but
    /// the offscreen records `scale_x` for later
    /// [`bind_for_size`](Offscreen::bind_for_size) calls.
    #[must_use]
    pub fn with_scale(mut self, scale_x: f64, scale_y: f64) -> Self {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self
    }

    /// Restricts the push to one region of the existing store.
    #[must_use]
    pub fn with_dst(mut self, dst: PixelRect) -> Self {
        self.dst = Some(dst);
        self
    }
}

enum BindTarget {
    Content(Size),
    Physical {
        physical: PhysicalSize,
        content: Size,
        scale: ScaleFactor,
    },
    Current,
}

struct State {
    surface: Option<Surface>,
    depth: u32,
    draws: u32,
    scale: ScaleFactor,
    cleared_with: Option<Color>,
    last_bind: Option<BindInfo>,
}

/// A lazily sized render target with a dirty flag.
///
/// Share as `Arc<Offscreen<D>>` between the painter and presenter threads.
pub struct Offscreen<D: Device> {
    id: OffscreenId,
    device: Arc<D>,
    config: SurfaceConfig,
    state: ReentrantMutex<RefCell<State>>,
    dirty: AtomicBool,
    /// Bits of the pending scale factor; 0 when none is pending.
    pending_scale: AtomicU64,
    background: Mutex<Color>,
}

impl<D: Device> fmt::Debug for Offscreen<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Offscreen")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl<D: Device> Offscreen<D> {
    /// Creates an offscreen without a backing store.
    #[must_use]
    pub fn new(device: Arc<D>, config: SurfaceConfig) -> Self {
        Self {
            id: OffscreenId::next(),
            device,
            config,
            state: ReentrantMutex::new(RefCell::new(State {
                surface: None,
                depth: 0,
                draws: 0,
                scale: ScaleFactor::ONE,
                cleared_with: None,
                last_bind: None,
            })),
            dirty: AtomicBool::new(false),
            pending_scale: AtomicU64::new(0),
            background: Mutex::new(Color::TRANSPARENT),
        }
    }

    /// Process-unique identity.
    #[must_use]
    pub fn id(&self) -> OffscreenId {
        self.id
    }

    /// The device this offscreen draws with.
    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Backing store layout.
    #[must_use]
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// Makes this offscreen the render target of the calling thread for the
    /// lifetime of the returned scope.
    ///
    /// The outermost bind applies any pending scale factor, recreates the
    /// backing store if `content` at that scale needs a different physical
    /// size, and clears to the background color when the store is new or
    /// the color changed. Nested binds on the same thread only deepen the
    /// scope and ignore `content`.
    ///
    /// Blocks while the presenter is blitting this offscreen.
    pub fn bind_for_size(&self, content: Size) -> Result<BoundOffscreen<'_, D>, OffscreenError> {
        self.bind(BindTarget::Content(content))
    }

    fn bind(&self, target: BindTarget) -> Result<BoundOffscreen<'_, D>, OffscreenError> {
        let entered = match context::enter(self.id) {
            Ok(entered) => entered,
            Err(bound) => {
                if cfg!(debug_assertions) {
                    panic!(
                        "offscreen {:?} bound while {bound:?} is bound on this thread",
                        self.id
                    );
                }
                tracing::warn!(
                    offscreen = ?self.id,
                    ?bound,
                    "refusing to bind a second offscreen on this thread"
                );
                return Err(OffscreenError::ContextBusy { bound });
            }
        };
        let guard = self.state.lock();
        let nested = {
            let mut state = guard.borrow_mut();
            if state.depth > 0 {
                state.depth += 1;
                state.last_bind
            } else {
                None
            }
        };
        if let Some(info) = nested {
            return Ok(BoundOffscreen {
                offscreen: self,
                guard,
                info,
            });
        }

        self.device.make_current();
        match self.prepare(&guard, target) {
            Ok((info, render_target)) => {
                context::set_target(self.id, Some(render_target));
                tracing::trace!(offscreen = ?self.id, physical = ?info.physical, "bound");
                Ok(BoundOffscreen {
                    offscreen: self,
                    guard,
                    info,
                })
            }
            Err(e) => {
                self.device.clear_current();
                if entered {
                    context::leave(self.id);
                }
                Err(e)
            }
        }
    }

    /// Outermost-bind work: apply scale, resize, clear.
    fn prepare(
        &self,
        guard: &ReentrantMutexGuard<'_, RefCell<State>>,
        target: BindTarget,
    ) -> Result<(BindInfo, TextureId), OffscreenError> {
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let pending = self.pending_scale.swap(0, Ordering::AcqRel);
        if pending != 0 {
            state.scale = ScaleFactor::new(f64::from_bits(pending));
        }
        let (physical, content) = match target {
            BindTarget::Content(content) => (state.scale.physical_for(content), content),
            BindTarget::Physical {
                physical,
                content,
                scale,
            } => {
                state.scale = scale;
                (physical, content)
            }
            BindTarget::Current => {
                let surface = state.surface.ok_or(OffscreenError::NoBackingStore)?;
                (surface.physical_size(), surface.content_size())
            }
        };
        if physical.is_empty() {
            return Err(OffscreenError::EmptySize(physical));
        }

        let background = *self.background.lock();
        let scale = state.scale;
        let mut previous = None;
        let mut recreated = false;
        match &mut state.surface {
            Some(surface) if surface.physical_size() == physical => {
                surface.set_content(content, scale);
            }
            slot => {
                if let Some(old) = slot.take() {
                    previous = Some(old.physical_size());
                    old.destroy(&*self.device);
                }
                tracing::debug!(
                    offscreen = ?self.id,
                    from = ?previous,
                    to = ?physical,
                    "recreating backing store"
                );
                match Surface::create(
                    &*self.device,
                    physical,
                    content,
                    scale,
                    &self.config,
                    background,
                ) {
                    Ok(surface) => *slot = Some(surface),
                    Err(e) => {
                        tracing::warn!(
                            offscreen = ?self.id,
                            ?physical,
                            %e,
                            "backing store allocation failed"
                        );
                        state.cleared_with = None;
                        self.dirty.store(false, Ordering::Release);
                        return Err(OffscreenError::Allocation(e));
                    }
                }
                recreated = true;
            }
        }
        let Some(surface) = state.surface else {
            return Err(OffscreenError::NoBackingStore);
        };
        if recreated {
            state.cleared_with = Some(background);
        } else if state.cleared_with != Some(background) {
            surface.attachments().clear(&*self.device, background)?;
            state.cleared_with = Some(background);
        }

        let info = BindInfo {
            physical,
            content,
            scale,
            previous,
            recreated,
        };
        state.depth = 1;
        state.draws = 0;
        state.last_bind = Some(info);
        Ok((info, surface.attachments().render_target()))
    }

    /// The color texture for sampling.
    ///
    /// `None` if there is no backing store or the offscreen is bound on the
    /// calling thread.
    #[must_use]
    pub fn texture(&self) -> Option<TextureId> {
        let guard = self.state.lock();
        let state = guard.borrow();
        if state.depth > 0 {
            return None;
        }
        state.surface.map(|s| s.attachments().color)
    }

    /// Size of the backing store, if any.
    #[must_use]
    pub fn physical_size(&self) -> Option<PhysicalSize> {
        let guard = self.state.lock();
        guard.borrow().surface.map(|s| s.physical_size())
    }

    /// The scale factor applied by the most recent outermost bind.
    #[must_use]
    pub fn scale_factor(&self) -> ScaleFactor {
        let guard = self.state.lock();
        guard.borrow().scale
    }

    /// Returns `true` if content was drawn since the last successful blit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the clear color. Applied by the next outermost bind.
    pub fn set_background_color(&self, color: Color) {
        *self.background.lock() = color;
    }

    /// Records a new scale factor for the next outermost bind.
    ///
    /// Never resizes immediately, so it is safe to call from any thread.
    pub fn notify_scale_factor_changed(&self, scale: f64) {
        let bits = ScaleFactor::new(scale).get().to_bits();
        self.pending_scale.store(bits, Ordering::Release);
    }

    /// Composites the contents into `dst_rect` of `dst`, scaling if the
    /// sizes differ, and clears the dirty flag.
    ///
    /// Blocks while the painter has the offscreen bound.
    pub fn blit_to(
        &self,
        dst: TextureId,
        dst_rect: PixelRect,
    ) -> Result<BlitInfo, OffscreenError> {
        let guard = self.state.lock();
        self.blit_locked(&guard, dst, dst_rect)
    }

    /// Like [`blit_to`](Self::blit_to) but returns
    /// [`BlitOutcome::Busy`] instead of waiting for the painter.
    pub fn try_blit_to(
        &self,
        dst: TextureId,
        dst_rect: PixelRect,
    ) -> Result<BlitOutcome, OffscreenError> {
        match self.state.try_lock() {
            Some(guard) => self
                .blit_locked(&guard, dst, dst_rect)
                .map(BlitOutcome::Blitted),
            None => Ok(BlitOutcome::Busy),
        }
    }

    /// Composites into the render target bound on the calling thread, at
    /// `content` scaled by this offscreen's scale factor.
    ///
    /// The thread's binding is left as it was.
    pub fn blit_for_size(&self, content: Size) -> Result<BlitInfo, OffscreenError> {
        let dst = context::current_target().ok_or(OffscreenError::NoTarget)?;
        let guard = self.state.lock();
        let scale = guard.borrow().scale;
        let dst_rect = scale.physical_for(content).bounds();
        self.blit_locked(&guard, dst, dst_rect)
    }

    fn blit_locked(
        &self,
        guard: &ReentrantMutexGuard<'_, RefCell<State>>,
        dst: TextureId,
        dst_rect: PixelRect,
    ) -> Result<BlitInfo, OffscreenError> {
        let state = guard.borrow();
        if state.depth > 0 {
            return Err(OffscreenError::Bound);
        }
        let surface = state.surface.ok_or(OffscreenError::NoBackingStore)?;
        self.device
            .blit(surface.attachments().color, surface.bounds(), dst, dst_rect)?;
        self.dirty.store(false, Ordering::Release);
        Ok(BlitInfo {
            src: surface.physical_size(),
            dst: dst_rect,
            scaled: surface.physical_size() != dst_rect.size(),
        })
    }

    /// Takes CPU-rendered pixels.
    ///
    /// A full push resizes the store to exactly `width x height` pixels with
    /// content size `width / scale_x` by `height / scale_y`, and records
    /// `scale_x` as the offscreen's scale factor (see
    /// [`PixelPush::with_scale`]). A push with a destination region writes
    /// only that region of the existing store.
    pub fn push_pixels(&self, push: &PixelPush<'_>) -> Result<(), OffscreenError> {
        let source = PixelRect::new(0, 0, push.width, push.height);
        let (bound, dst) = match push.dst {
            None => {
                let sx = ScaleFactor::new(push.scale_x);
                let sy = ScaleFactor::new(push.scale_y);
                if sx != sy {
                    tracing::debug!(
                        offscreen = ?self.id,
                        scale_x = sx.get(),
                        scale_y = sy.get(),
                        "non-uniform push, keeping horizontal scale"
                    );
                }
                let content = Size::new(
                    f64::from(push.width) / sx.get(),
                    f64::from(push.height) / sy.get(),
                );
                let bound = self.bind(BindTarget::Physical {
                    physical: source.size(),
                    content,
                    scale: sx,
                })?;
                (bound, source)
            }
            Some(dst) => {
                if dst.size() != source.size() {
                    return Err(OffscreenError::RectMismatch {
                        width: push.width,
                        height: push.height,
                        dst,
                    });
                }
                (self.bind(BindTarget::Current)?, dst)
            }
        };
        let layout = PixelLayout::packed(push.format, push.width);
        bound.upload(push.pixels, push.format, dst, layout)
    }

    /// Drops the backing store. The next bind allocates a new one.
    pub fn release(&self) -> Result<(), OffscreenError> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.depth > 0 {
            return Err(OffscreenError::Bound);
        }
        if let Some(surface) = state.surface.take() {
            surface.destroy(&*self.device);
        }
        state.cleared_with = None;
        state.last_bind = None;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

impl<D: Device> Drop for Offscreen<D> {
    fn drop(&mut self) {
        if let Some(surface) = self.state.get_mut().get_mut().surface.take() {
            surface.destroy(&*self.device);
        }
    }
}

/// A bind scope on the painter thread.
///
/// Ending the outermost scope (drop or [`unbind`](Self::unbind)) marks the
/// offscreen dirty if anything was drawn, resolves multisampling, and
/// restores the thread's previous context. Not `Send`: a scope ends on the
/// thread that opened it.
pub struct BoundOffscreen<'a, D: Device> {
    offscreen: &'a Offscreen<D>,
    guard: ReentrantMutexGuard<'a, RefCell<State>>,
    info: BindInfo,
}

impl<D: Device> fmt::Debug for BoundOffscreen<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundOffscreen")
            .field("offscreen", &self.offscreen.id)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl<D: Device> BoundOffscreen<'_, D> {
    /// What the outermost bind did.
    #[must_use]
    pub fn info(&self) -> &BindInfo {
        &self.info
    }

    /// Backing store size.
    #[must_use]
    pub fn physical_size(&self) -> PhysicalSize {
        self.info.physical
    }

    /// The bound offscreen.
    #[must_use]
    pub fn offscreen(&self) -> &Offscreen<D> {
        self.offscreen
    }

    /// Draw calls recorded since the outermost bind.
    #[must_use]
    pub fn draw_count(&self) -> u32 {
        self.guard.borrow().draws
    }

    fn attachments(&self) -> Result<Attachments, OffscreenError> {
        self.guard
            .borrow()
            .surface
            .map(|s| *s.attachments())
            .ok_or(OffscreenError::NoBackingStore)
    }

    fn count_draw(&self) {
        let mut state = self.guard.borrow_mut();
        state.draws = state.draws.saturating_add(1);
    }

    /// Fills the whole target.
    pub fn clear(&self, color: Color) -> Result<(), OffscreenError> {
        let target = self.attachments()?.render_target();
        self.offscreen.device.clear(target, color)?;
        self.count_draw();
        Ok(())
    }

    /// Fills one region.
    pub fn fill_rect(&self, rect: PixelRect, color: Color) -> Result<(), OffscreenError> {
        let target = self.attachments()?.render_target();
        self.offscreen.device.fill_rect(target, rect, color)?;
        self.count_draw();
        Ok(())
    }

    /// Uploads pixels of `format` into `dst`.
    ///
    /// RGBA and BGRA sources are swizzled to the surface format; other
    /// mismatches are refused.
    pub fn upload(
        &self,
        pixels: &[u8],
        format: PixelFormat,
        dst: PixelRect,
        layout: PixelLayout,
    ) -> Result<(), OffscreenError> {
        let target = self.attachments()?.render_target();
        let surface_format = self.offscreen.config.format;
        if format == surface_format {
            self.offscreen
                .device
                .write_texture(target, dst, pixels, layout)?;
        } else {
            let packed = swizzle(pixels, format, surface_format, dst.size(), layout)?;
            self.offscreen.device.write_texture(
                target,
                dst,
                &packed,
                PixelLayout::packed(surface_format, dst.width),
            )?;
        }
        self.count_draw();
        Ok(())
    }

    /// Runs custom drawing against the device and the attachments.
    ///
    /// Counts as one draw call.
    pub fn draw_with<R>(
        &self,
        f: impl FnOnce(&D, &Attachments) -> R,
    ) -> Result<R, OffscreenError> {
        let attachments = self.attachments()?;
        let out = f(&self.offscreen.device, &attachments);
        self.count_draw();
        Ok(out)
    }

    /// Ends the scope.
    pub fn unbind(self) {
        drop(self);
    }
}

impl<D: Device> Drop for BoundOffscreen<'_, D> {
    fn drop(&mut self) {
        let offscreen = self.offscreen;
        let mut state = self.guard.borrow_mut();
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        let drew = core::mem::take(&mut state.draws) > 0;
        if drew && let Some(surface) = state.surface {
            match surface
                .attachments()
                .resolve(&*offscreen.device, surface.physical_size())
            {
                Ok(()) => offscreen.dirty.store(true, Ordering::Release),
                Err(e) => tracing::warn!(offscreen = ?offscreen.id, %e, "msaa resolve failed"),
            }
        }
        drop(state);
        offscreen.device.clear_current();
        context::leave(offscreen.id);
        tracing::trace!(offscreen = ?offscreen.id, drew, "unbound");
    }
}

/// Repacks RGBA↔BGRA pixels into a tight buffer.
fn swizzle(
    pixels: &[u8],
    from: PixelFormat,
    to: PixelFormat,
    size: PhysicalSize,
    layout: PixelLayout,
) -> Result<Vec<u8>, OffscreenError> {
    let convertible = matches!(
        (from, to),
        (PixelFormat::RgbaPre, PixelFormat::BgraPre) | (PixelFormat::BgraPre, PixelFormat::RgbaPre)
    );
    if !convertible {
        return Err(OffscreenError::UnsupportedFormat { from, to });
    }
    let row_len = size.width as usize * 4;
    let mut out = Vec::with_capacity(row_len * size.height as usize);
    for y in 0..size.height {
        let start = layout.offset_of(from, 0, y);
        let row = pixels
            .get(start..start + row_len)
            .ok_or(DeviceError::SourceTooShort {
                needed: start + row_len,
                got: pixels.len(),
            })?;
        for px in row.chunks_exact(4) {
            out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    fn offscreen() -> (Arc<SoftwareDevice>, Offscreen<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::new());
        let offscreen = Offscreen::new(device.clone(), SurfaceConfig::default());
        (device, offscreen)
    }

    fn layer(device: &SoftwareDevice, w: u32, h: u32) -> TextureId {
        device
            .create_texture(&crate::device::TextureDesc::color(
                PhysicalSize::new(w, h),
                PixelFormat::RgbaPre,
            ))
            .unwrap()
    }

    #[test]
    fn hidpi_bind_doubles_backing_store() {
        let (_device, offscreen) = offscreen();
        offscreen.notify_scale_factor_changed(2.0);
        let bound = offscreen.bind_for_size(Size::new(100.0, 100.0)).unwrap();
        assert_eq!(bound.physical_size(), PhysicalSize::new(200, 200));
        drop(bound);

        offscreen.notify_scale_factor_changed(1.0);
        // Deferred until the next bind.
        assert_eq!(offscreen.physical_size(), Some(PhysicalSize::new(200, 200)));
        let bound = offscreen.bind_for_size(Size::new(100.0, 100.0)).unwrap();
        assert_eq!(bound.physical_size(), PhysicalSize::new(100, 100));
        assert_eq!(bound.info().previous, Some(PhysicalSize::new(200, 200)));
    }

    #[test]
    fn resize_replaces_the_backing_store() {
        let (device, offscreen) = offscreen();
        offscreen
            .bind_for_size(Size::new(10.0, 10.0))
            .unwrap()
            .clear(Color::WHITE)
            .unwrap();
        let first = offscreen.texture().unwrap();

        let bound = offscreen.bind_for_size(Size::new(20.0, 5.0)).unwrap();
        assert!(bound.info().recreated);
        drop(bound);
        let second = offscreen.texture().unwrap();
        assert_ne!(first, second);
        assert_eq!(device.texture_desc(first), None);
        assert_eq!(
            device.texture_desc(second).unwrap().size,
            PhysicalSize::new(20, 5)
        );
        assert_eq!(device.live_textures(), 1);
    }

    #[test]
    fn dirty_tracks_draws_and_blits() {
        let (device, offscreen) = offscreen();
        assert!(!offscreen.is_dirty());

        // A bind without draws does not dirty.
        drop(offscreen.bind_for_size(Size::new(4.0, 4.0)).unwrap());
        assert!(!offscreen.is_dirty());

        let bound = offscreen.bind_for_size(Size::new(4.0, 4.0)).unwrap();
        bound.fill_rect(PixelRect::new(0, 0, 2, 2), Color::BLACK).unwrap();
        assert!(!offscreen.is_dirty());
        bound.unbind();
        assert!(offscreen.is_dirty());

        let dst = layer(&device, 4, 4);
        offscreen.blit_to(dst, PixelRect::new(0, 0, 4, 4)).unwrap();
        assert!(!offscreen.is_dirty());
    }

    #[test]
    fn nested_binds_share_one_scope() {
        let (device, offscreen) = offscreen();
        let outer = offscreen.bind_for_size(Size::new(8.0, 8.0)).unwrap();
        {
            // Size is ignored past the outermost bind.
            let inner = offscreen.bind_for_size(Size::new(2.0, 2.0)).unwrap();
            assert_eq!(inner.physical_size(), PhysicalSize::new(8, 8));
            inner.clear(Color::WHITE).unwrap();
        }
        assert!(!offscreen.is_dirty());
        assert!(device.is_current());
        assert_eq!(outer.draw_count(), 1);
        drop(outer);
        assert!(offscreen.is_dirty());
        assert!(!device.is_current());
    }

    #[test]
    fn texture_is_hidden_while_bound_here() {
        let (_device, offscreen) = offscreen();
        assert_eq!(offscreen.texture(), None);
        let bound = offscreen.bind_for_size(Size::new(3.0, 3.0)).unwrap();
        assert_eq!(offscreen.texture(), None);
        assert_eq!(
            offscreen.blit_to(TextureId::from_raw(0), PixelRect::new(0, 0, 1, 1)),
            Err(OffscreenError::Bound)
        );
        drop(bound);
        assert!(offscreen.texture().is_some());
    }

    #[test]
    fn allocation_failure_leaves_nothing_to_present() {
        let (device, offscreen) = offscreen();
        offscreen
            .bind_for_size(Size::new(4.0, 4.0))
            .unwrap()
            .clear(Color::WHITE)
            .unwrap();
        assert!(offscreen.is_dirty());

        device.fail_allocation_after(0);
        let err = offscreen.bind_for_size(Size::new(8.0, 8.0)).unwrap_err();
        assert!(matches!(err, OffscreenError::Allocation(_)));
        assert!(!offscreen.is_dirty());
        assert_eq!(offscreen.texture(), None);
        assert_eq!(context::bound_offscreen(), None);

        // Retried on the next bind.
        assert!(offscreen.bind_for_size(Size::new(8.0, 8.0)).is_ok());
    }

    #[test]
    fn background_applies_on_next_bind() {
        let (device, offscreen) = offscreen();
        drop(offscreen.bind_for_size(Size::new(1.0, 1.0)).unwrap());
        offscreen.set_background_color(Color::WHITE);
        let tex = offscreen.texture().unwrap();
        assert_eq!(
            device.read_pixels(tex, PixelRect::new(0, 0, 1, 1)).unwrap(),
            vec![0, 0, 0, 0]
        );
        drop(offscreen.bind_for_size(Size::new(1.0, 1.0)).unwrap());
        assert_eq!(
            device.read_pixels(tex, PixelRect::new(0, 0, 1, 1)).unwrap(),
            vec![255; 4]
        );
    }

    #[test]
    fn sub_rect_push_leaves_outside_untouched() {
        let (device, offscreen) = offscreen();
        let full = vec![10_u8; 4 * 4 * 4];
        offscreen
            .push_pixels(&PixelPush::new(&full, 4, 4, PixelFormat::RgbaPre))
            .unwrap();
        let patch = vec![200_u8; 2 * 2 * 4];
        offscreen
            .push_pixels(
                &PixelPush::new(&patch, 2, 2, PixelFormat::RgbaPre)
                    .with_dst(PixelRect::new(1, 1, 2, 2)),
            )
            .unwrap();
        assert_eq!(offscreen.physical_size(), Some(PhysicalSize::new(4, 4)));

        let px = device
            .read_pixels(offscreen.texture().unwrap(), PixelRect::new(0, 0, 4, 4))
            .unwrap();
        for y in 0..4_usize {
            for x in 0..4_usize {
                let inside = (1..3).contains(&x) && (1..3).contains(&y);
                let expected = if inside { 200 } else { 10 };
                assert_eq!(px[(y * 4 + x) * 4], expected, "pixel ({x}, {y})");
            }
        }
        assert!(offscreen.is_dirty());
    }

    #[test]
    fn full_push_sizes_by_scale() {
        let (_device, offscreen) = offscreen();
        let pixels = vec![0_u8; 8 * 6 * 4];
        offscreen
            .push_pixels(
                &PixelPush::new(&pixels, 8, 6, PixelFormat::BgraPre).with_scale(2.0, 2.0),
            )
            .unwrap();
        assert_eq!(offscreen.physical_size(), Some(PhysicalSize::new(8, 6)));
        assert_eq!(offscreen.scale_factor(), ScaleFactor::new(2.0));
    }

    #[test]
    fn non_uniform_push_keeps_pixels_and_horizontal_scale() {
        let (_device, offscreen) = offscreen();
        let pixels = vec![0_u8; 8 * 6 * 4];
        offscreen
            .push_pixels(
                &PixelPush::new(&pixels, 8, 6, PixelFormat::RgbaPre).with_scale(2.0, 3.0),
            )
            .unwrap();
        assert_eq!(offscreen.physical_size(), Some(PhysicalSize::new(8, 6)));
        assert_eq!(offscreen.scale_factor(), ScaleFactor::new(2.0));

        // Region updates reuse the store as pushed.
        offscreen
            .push_pixels(
                &PixelPush::new(&[9; 4], 1, 1, PixelFormat::RgbaPre)
                    .with_dst(PixelRect::new(7, 5, 1, 1)),
            )
            .unwrap();
        assert_eq!(offscreen.physical_size(), Some(PhysicalSize::new(8, 6)));
    }

    #[test]
    fn bgra_push_is_swizzled() {
        let (device, offscreen) = offscreen();
        offscreen
            .push_pixels(&PixelPush::new(&[1, 2, 3, 4], 1, 1, PixelFormat::BgraPre))
            .unwrap();
        let px = device
            .read_pixels(offscreen.texture().unwrap(), PixelRect::new(0, 0, 1, 1))
            .unwrap();
        assert_eq!(px, vec![3, 2, 1, 4]);
    }

    #[test]
    fn sub_rect_push_needs_a_store() {
        let (_device, offscreen) = offscreen();
        let push = PixelPush::new(&[0; 4], 1, 1, PixelFormat::RgbaPre)
            .with_dst(PixelRect::new(0, 0, 1, 1));
        assert_eq!(
            offscreen.push_pixels(&push),
            Err(OffscreenError::NoBackingStore)
        );
    }

    #[test]
    fn blit_for_size_targets_the_bound_offscreen() {
        let device = Arc::new(SoftwareDevice::new());
        let source = Offscreen::new(device.clone(), SurfaceConfig::default());
        let window = Offscreen::new(device.clone(), SurfaceConfig::default());
        source
            .bind_for_size(Size::new(2.0, 2.0))
            .unwrap()
            .clear(Color::WHITE)
            .unwrap();

        assert_eq!(
            source.blit_for_size(Size::new(4.0, 4.0)),
            Err(OffscreenError::NoTarget)
        );
        let bound = window.bind_for_size(Size::new(4.0, 4.0)).unwrap();
        let info = source.blit_for_size(Size::new(4.0, 4.0)).unwrap();
        assert!(info.scaled);
        // The window stays bound.
        assert_eq!(context::bound_offscreen(), Some(window.id()));
        drop(bound);

        let px = device
            .read_pixels(window.texture().unwrap(), PixelRect::new(0, 0, 4, 4))
            .unwrap();
        assert!(px.iter().all(|&b| b == 255));
    }

    #[test]
    fn msaa_resolves_on_unbind() {
        let device = Arc::new(SoftwareDevice::new());
        let config = SurfaceConfig {
            msaa_samples: 4,
            ..SurfaceConfig::default()
        };
        let offscreen = Offscreen::new(device.clone(), config);
        offscreen
            .bind_for_size(Size::new(2.0, 2.0))
            .unwrap()
            .clear(Color::WHITE)
            .unwrap();
        let px = device
            .read_pixels(offscreen.texture().unwrap(), PixelRect::new(0, 0, 2, 2))
            .unwrap();
        assert!(px.iter().all(|&b| b == 255));
    }

    #[test]
    fn release_drops_the_store() {
        let (device, offscreen) = offscreen();
        drop(offscreen.bind_for_size(Size::new(2.0, 2.0)).unwrap());
        offscreen.release().unwrap();
        assert_eq!(offscreen.texture(), None);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn try_blit_reports_busy_while_painter_holds_it() {
        let (device, offscreen) = offscreen();
        let offscreen = Arc::new(offscreen);
        let dst = layer(&device, 2, 2);
        let bound = offscreen.bind_for_size(Size::new(2.0, 2.0)).unwrap();
        let presenter = {
            let offscreen = offscreen.clone();
            std::thread::spawn(move || offscreen.try_blit_to(dst, PixelRect::new(0, 0, 2, 2)))
        };
        assert_eq!(presenter.join().unwrap(), Ok(BlitOutcome::Busy));
        drop(bound);
        assert!(matches!(
            offscreen.try_blit_to(dst, PixelRect::new(0, 0, 2, 2)),
            Ok(BlitOutcome::Blitted(_))
        ));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "is bound on this thread")]
    fn second_offscreen_on_one_thread_panics_in_debug() {
        let (device, a) = offscreen();
        let b = Offscreen::new(device, SurfaceConfig::default());
        let _bound = a.bind_for_size(Size::new(1.0, 1.0)).unwrap();
        let _ = b.bind_for_size(Size::new(1.0, 1.0));
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn second_offscreen_on_one_thread_is_refused_in_release() {
        let (device, a) = offscreen();
        let b = Offscreen::new(device, SurfaceConfig::default());
        let _bound = a.bind_for_size(Size::new(1.0, 1.0)).unwrap();
        assert_eq!(
            b.bind_for_size(Size::new(1.0, 1.0)).unwrap_err(),
            OffscreenError::ContextBusy { bound: a.id() }
        );
    }
}
