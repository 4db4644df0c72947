// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The layer bridge: hands finished frames from a painter thread to a
//! presenter thread.
//!
//! The bridge owns two offscreens. The painter always draws into the one
//! that is not on glass; when a frame is finished the two swap roles under a
//! short lock. The presenter composites whatever is on glass into its layer's
//! drawable and presents it.
//!
//! ```text
//!   painter thread                       presenter thread
//!   ──────────────                       ────────────────
//!   paint(size, |frame| ..)
//!     begin_write(slot)
//!     bind painter offscreen
//!     draw, reserve, upload
//!     unbind  ──► dirty
//!     update_buffer_in_use
//!     submit ─────────────► device ──► signal_completed(slot)
//!     host ─┐ swap under lock
//!           └──────────────────────────► flush()
//!                                          try_blit glass → drawable
//!                                          present
//!                                          signal_presented(slot)
//! ```
//!
//! Presentation is mailbox style: a finished frame that was never presented
//! is dropped when a newer one is hosted, and its ring slot is released. The
//! painter therefore only waits for the device, never for the presenter.
//!
//! The frame state machine is `Idle → Painting → Finished → Presenting → Idle`.
//! Frames are not cleared between paints (the painter reuses the offscreen
//! that was on glass two frames ago), so each frame must repaint everything
//! it shows.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use kurbo::Size;
use parking_lot::Mutex;

use crate::config::{ConfigError, HandoffConfig};
use crate::device::{Device, DeviceError, PipelineId, TextureDesc, TextureId};
use crate::format::{Color, PixelFormat};
use crate::geometry::{PhysicalSize, ScaleFactor};
use crate::offscreen::{BlitOutcome, BoundOffscreen, Offscreen, OffscreenError};
use crate::remote::{LayerHost, RemoteHandle, RemoteLayerId};
use crate::resource::{PipelineCache, PipelineKey, Texture};
use crate::ring::{FrameRing, Reservation, RingBuffer, RingError, SlotIndex};
use crate::surface::SurfaceConfig;
use crate::trace::{
    BindEvent, BlitEvent, FlushEvent, FrameStateEvent, HandoffFallbackEvent, ReserveOverrunEvent,
    ResizeEvent, TraceSink, Tracer,
};

// ---------------------------------------------------------------------------
// Presentation targets
// ---------------------------------------------------------------------------

/// A layer the presenter composites into.
pub trait PresentTarget<D: Device>: Send {
    /// The texture to composite into this cycle, with its size.
    ///
    /// `None` if the layer cannot take a frame right now.
    fn drawable(&mut self) -> Option<(TextureId, PhysicalSize)>;

    /// Shows what was composited into the drawable.
    fn present(&mut self);
}

impl<D: Device, T: PresentTarget<D> + ?Sized> PresentTarget<D> for Arc<Mutex<T>> {
    fn drawable(&mut self) -> Option<(TextureId, PhysicalSize)> {
        self.lock().drawable()
    }

    fn present(&mut self) {
        self.lock().present();
    }
}

/// A presentation layer backed by a device texture.
///
/// Stands in for a window surface wherever there is none: headless
/// rendering, tests, and the consuming side of a remote handoff.
pub struct SoftwareLayer<D: Device> {
    device: Arc<D>,
    format: PixelFormat,
    size: PhysicalSize,
    framebuffer: Option<Texture<D>>,
    presents: u64,
}

impl<D: Device> fmt::Debug for SoftwareLayer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareLayer")
            .field("format", &self.format)
            .field("size", &self.size)
            .field("framebuffer", &self.framebuffer.as_ref().map(Texture::id))
            .field("presents", &self.presents)
            .finish_non_exhaustive()
    }
}

impl<D: Device> SoftwareLayer<D> {
    /// Creates an RGBA layer of `size`. The framebuffer is allocated on
    /// first use.
    #[must_use]
    pub fn new(device: Arc<D>, size: PhysicalSize) -> Self {
        Self {
            device,
            format: PixelFormat::RgbaPre,
            size,
            framebuffer: None,
            presents: 0,
        }
    }

    /// Uses `format` for the framebuffer.
    #[must_use]
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Changes the layer size. The framebuffer is replaced on next use.
    pub fn resize(&mut self, size: PhysicalSize) {
        self.size = size;
    }

    /// Layer size.
    #[must_use]
    pub fn size(&self) -> PhysicalSize {
        self.size
    }

    /// Number of frames presented.
    #[must_use]
    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// The current framebuffer texture.
    #[must_use]
    pub fn framebuffer(&self) -> Option<TextureId> {
        self.framebuffer.as_ref().map(Texture::id)
    }

    /// Reads back the framebuffer.
    #[must_use]
    pub fn pixels(&self) -> Option<Vec<u8>> {
        let fb = self.framebuffer.as_ref()?;
        self.device.read_pixels(fb.id(), fb.size().bounds()).ok()
    }
}

impl<D: Device> PresentTarget<D> for SoftwareLayer<D> {
    fn drawable(&mut self) -> Option<(TextureId, PhysicalSize)> {
        if self.size.is_empty() {
            return None;
        }
        if self.framebuffer.as_ref().is_none_or(|fb| fb.size() != self.size) {
            self.framebuffer = None;
            let desc = TextureDesc::color(self.size, self.format);
            match Texture::create(self.device.clone(), desc) {
                Ok(fb) => self.framebuffer = Some(fb),
                Err(e) => {
                    tracing::warn!(size = ?self.size, %e, "layer framebuffer allocation failed");
                    return None;
                }
            }
        }
        self.framebuffer.as_ref().map(|fb| (fb.id(), fb.size()))
    }

    fn present(&mut self) {
        self.presents += 1;
    }
}

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

/// Where the most recent frame is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameState {
    /// No frame is waiting to be presented.
    Idle = 0,
    /// The painter is recording a frame.
    Painting = 1,
    /// A frame is on glass waiting for the presenter.
    Finished = 2,
    /// The presenter is compositing the frame on glass.
    Presenting = 3,
}

impl FrameState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Painting,
            2 => Self::Finished,
            3 => Self::Presenting,
            _ => Self::Idle,
        }
    }
}

/// Result of one [`LayerBridge::flush`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub enum FlushOutcome {
    /// A new frame was composited and presented.
    Presented,
    /// The frame on glass was already presented.
    Clean,
    /// The frame on glass is locked; try again next cycle.
    Busy,
    /// No frame, no drawable, or the bridge was torn down.
    NothingToPresent,
}

/// Where flushes go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentationMode {
    /// The bridge's own layer.
    Local,
    /// A layer hosted by another process.
    Remote(RemoteLayerId),
}

/// Errors from building a bridge or painting a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bridge was torn down; nothing more will be presented.
    #[error("layer bridge has been torn down")]
    TornDown,
    /// Another frame is being painted.
    #[error("a frame is already being painted")]
    AlreadyPainting,
    /// No ring slot was free, or per-frame memory could not be set up.
    #[error(transparent)]
    Ring(#[from] RingError),
    /// Binding the painter offscreen failed.
    #[error(transparent)]
    Offscreen(#[from] OffscreenError),
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// LayerBridge
// ---------------------------------------------------------------------------

struct Glass<D: Device> {
    offscreen: Arc<Offscreen<D>>,
    slot: SlotIndex,
    frame: u64,
    presented: bool,
}

struct Inner<D: Device> {
    painter: Option<Arc<Offscreen<D>>>,
    glass: Option<Glass<D>>,
    local: Box<dyn PresentTarget<D>>,
    remote: Option<(RemoteLayerId, Box<dyn PresentTarget<D>>)>,
}

/// Per-frame allocators, owned by whoever is painting.
struct Painting<D: Device> {
    uploads: RingBuffer<D>,
    pipelines: PipelineCache<D>,
}

/// Connects one painter thread to one presenter thread.
///
/// Share as `Arc<LayerBridge<D>>`. [`paint`](Self::paint) is called from the
/// painter thread and [`flush`](Self::flush) from the presenter thread.
/// The presenter never waits for the painter. Handing a finished frame over
/// may wait for a flush in progress to finish its blit and present; drawing
/// itself never does.
pub struct LayerBridge<D: Device> {
    device: Arc<D>,
    ring: Arc<FrameRing>,
    surface: SurfaceConfig,
    inner: Mutex<Inner<D>>,
    painting: Mutex<Painting<D>>,
    sink: Mutex<Option<Box<dyn TraceSink + Send>>>,
    state: AtomicU8,
    torn_down: AtomicBool,
    frames: AtomicU64,
    /// Bits of the scale factor applied at the next paint.
    scale: AtomicU64,
    background: Mutex<Color>,
}

impl<D: Device> fmt::Debug for LayerBridge<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerBridge")
            .field("ring", &self.ring)
            .field("state", &self.frame_state())
            .field("torn_down", &self.is_torn_down())
            .field("frames", &self.frames.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<D: Device> LayerBridge<D> {
    /// Creates a bridge presenting into `layer`.
    ///
    /// Allocates the frame ring, one per-frame upload buffer per slot, and
    /// the pipeline cache. Offscreens are allocated by the first paint.
    pub fn new(
        device: Arc<D>,
        layer: Box<dyn PresentTarget<D>>,
        config: &HandoffConfig,
    ) -> Result<Self, FrameError> {
        config.validate()?;
        let ring = Arc::new(FrameRing::new(config.ring.slots)?);
        let uploads = RingBuffer::new(
            device.clone(),
            ring.clone(),
            config.ring.slot_size,
            config.ring.alignment,
        )?;
        let pipelines = PipelineCache::new(device.clone(), config.pipeline.capacity());
        Ok(Self {
            device,
            ring,
            surface: config.surface.surface_config(),
            inner: Mutex::new(Inner {
                painter: None,
                glass: None,
                local: layer,
                remote: None,
            }),
            painting: Mutex::new(Painting { uploads, pipelines }),
            sink: Mutex::new(None),
            state: AtomicU8::new(FrameState::Idle as u8),
            torn_down: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            scale: AtomicU64::new(ScaleFactor::ONE.get().to_bits()),
            background: Mutex::new(config.surface.background_color()),
        })
    }

    /// The device frames are drawn with.
    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The frame ring. Other per-frame allocators for this painter (meshes,
    /// extra ring buffers) should share it.
    #[must_use]
    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    /// State of the most recent frame.
    #[must_use]
    pub fn frame_state(&self) -> FrameState {
        FrameState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Index of the most recently started frame; 0 before the first.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Returns `true` once [`tear_down`](Self::tear_down) was called.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Scale factor the next paint uses.
    #[must_use]
    pub fn scale_factor(&self) -> ScaleFactor {
        ScaleFactor::new(f64::from_bits(self.scale.load(Ordering::Acquire)))
    }

    /// Records a new scale factor. Takes effect at the next paint; the frame
    /// being painted keeps its size.
    pub fn notify_scale_factor_changed(&self, scale: f64) {
        let bits = ScaleFactor::new(scale).get().to_bits();
        self.scale.store(bits, Ordering::Release);
        tracing::debug!(scale, "scale factor changed");
    }

    /// Sets the clear color for newly allocated backing stores.
    pub fn set_background_color(&self, color: Color) {
        *self.background.lock() = color;
    }

    /// Installs a sink for structured trace events.
    ///
    /// Events are only delivered when the `trace` feature is enabled.
    pub fn set_trace_sink(&self, sink: impl TraceSink + Send + 'static) {
        *self.sink.lock() = Some(Box::new(sink));
    }

    /// Removes and returns the trace sink.
    pub fn take_trace_sink(&self) -> Option<Box<dyn TraceSink + Send>> {
        self.sink.lock().take()
    }

    fn trace(&self, emit: impl FnOnce(&mut Tracer<'_>)) {
        if !cfg!(feature = "trace") {
            return;
        }
        let mut sink = self.sink.lock();
        let mut tracer = match sink.as_deref_mut() {
            Some(sink) => Tracer::new(sink),
            None => Tracer::none(),
        };
        emit(&mut tracer);
    }

    fn set_state(&self, frame_index: u64, to: FrameState) {
        let from = FrameState::from_u8(self.state.swap(to as u8, Ordering::AcqRel));
        if from != to {
            self.state_changed(frame_index, from, to);
        }
    }

    fn transition(&self, frame_index: u64, from: FrameState, to: FrameState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            self.state_changed(frame_index, from, to);
        }
        moved
    }

    fn state_changed(&self, frame_index: u64, from: FrameState, to: FrameState) {
        tracing::trace!(frame_index, ?from, ?to, "frame state");
        self.trace(|t| {
            t.frame_state(&FrameStateEvent {
                frame_index,
                from,
                to,
            });
        });
    }

    // ----- Painter side -----

    /// Paints one frame of logical size `content` and hands it to the
    /// presenter.
    ///
    /// `draw` records the frame through the [`Frame`]. If it draws nothing,
    /// no frame is produced and the slot is released. Errors leave the frame
    /// on glass untouched:
    ///
    /// - [`FrameError::Ring`] with [`RingError::SlotInFlight`] when the
    ///   device has not finished with the slot yet. Skip this frame.
    /// - [`FrameError::TornDown`] if the bridge was torn down before or
    ///   during the paint.
    pub fn paint<R>(
        &self,
        content: Size,
        draw: impl FnOnce(&mut Frame<'_, D>) -> R,
    ) -> Result<R, FrameError> {
        if self.is_torn_down() {
            return Err(FrameError::TornDown);
        }
        let Some(mut painting) = self.painting.try_lock() else {
            return Err(FrameError::AlreadyPainting);
        };
        let slot = match self.ring.begin_write() {
            Ok(slot) => slot,
            Err(e) => {
                tracing::debug!(%e, "no ring slot, skipping frame");
                return Err(e.into());
            }
        };
        let frame_index = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        let painter = self.take_painter();
        self.set_state(frame_index, FrameState::Painting);

        let painted = self.paint_into(&painter, &mut painting, slot, frame_index, content, draw);
        drop(painting);

        if self.is_torn_down() {
            self.ring.release_slot(slot);
            self.set_state(frame_index, FrameState::Idle);
            return Err(FrameError::TornDown);
        }
        let (out, drew) = match painted {
            Ok(painted) => painted,
            Err(e) => {
                self.ring.release_slot(slot);
                self.settle(frame_index, painter);
                return Err(e);
            }
        };
        if !drew {
            tracing::trace!(frame_index, "nothing drawn");
            self.ring.release_slot(slot);
            self.settle(frame_index, painter);
            return Ok(out);
        }

        let handed = match self.ring.update_buffer_in_use() {
            Ok(handed) => handed,
            Err(e) => {
                self.settle(frame_index, painter);
                return Err(e.into());
            }
        };
        let ring = Arc::clone(&self.ring);
        self.device.submit(Box::new(move || {
            ring.signal_completed(handed);
        }));
        self.host(painter, handed, frame_index);
        Ok(out)
    }

    fn paint_into<R>(
        &self,
        painter: &Offscreen<D>,
        painting: &mut Painting<D>,
        slot: SlotIndex,
        frame_index: u64,
        content: Size,
        draw: impl FnOnce(&mut Frame<'_, D>) -> R,
    ) -> Result<(R, bool), FrameError> {
        painting.uploads.reset_offsets()?;
        painter.set_background_color(*self.background.lock());
        painter.notify_scale_factor_changed(self.scale_factor().get());
        let bound = painter.bind_for_size(content)?;
        let info = *bound.info();
        self.trace(|t| {
            t.bind(&BindEvent::new(frame_index, painter.id(), &info));
            if info.recreated {
                t.resize(&ResizeEvent {
                    frame_index,
                    offscreen: painter.id(),
                    from: info.previous,
                    to: info.physical,
                });
            }
        });

        let mut frame = Frame {
            bridge: self,
            bound: &bound,
            painting,
            slot,
            index: frame_index,
        };
        let out = draw(&mut frame);
        let drew = bound.draw_count() > 0;
        bound.unbind();
        Ok((out, drew))
    }

    fn take_painter(&self) -> Arc<Offscreen<D>> {
        self.inner
            .lock()
            .painter
            .take()
            .unwrap_or_else(|| Arc::new(Offscreen::new(self.device.clone(), self.surface)))
    }

    /// Returns an unused painter offscreen and restores the frame state to
    /// what is on glass.
    fn settle(&self, frame_index: u64, painter: Arc<Offscreen<D>>) {
        let mut inner = self.inner.lock();
        inner.painter = Some(painter);
        let waiting = inner.glass.as_ref().is_some_and(|g| !g.presented);
        drop(inner);
        let to = if waiting {
            FrameState::Finished
        } else {
            FrameState::Idle
        };
        self.set_state(frame_index, to);
    }

    /// Puts a finished offscreen on glass.
    ///
    /// `slot` is the ring slot the frame's device work was submitted from;
    /// its presenter hold is released once the frame is presented or
    /// superseded. Returns the offscreen that was on glass, which the
    /// caller may paint into next. `offscreen` must not be the one currently
    /// on glass.
    pub fn host_offscreen(
        &self,
        offscreen: Arc<Offscreen<D>>,
        slot: SlotIndex,
    ) -> Option<Arc<Offscreen<D>>> {
        let frame_index = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        let mut inner = self.inner.lock();
        let recycled = self.swap_glass(&mut inner, offscreen, slot, frame_index);
        self.mark_finished(frame_index);
        drop(inner);
        recycled
    }

    fn host(&self, painter: Arc<Offscreen<D>>, slot: SlotIndex, frame_index: u64) {
        let mut inner = self.inner.lock();
        let recycled = self.swap_glass(&mut inner, painter, slot, frame_index);
        if inner.painter.is_none() {
            inner.painter = recycled;
        }
        self.mark_finished(frame_index);
        drop(inner);
    }

    /// Called with `inner` held, so a concurrent teardown either ran before
    /// the swap or resets the state after this.
    fn mark_finished(&self, frame_index: u64) {
        if !self.is_torn_down() {
            self.set_state(frame_index, FrameState::Finished);
        }
    }

    fn swap_glass(
        &self,
        inner: &mut Inner<D>,
        offscreen: Arc<Offscreen<D>>,
        slot: SlotIndex,
        frame_index: u64,
    ) -> Option<Arc<Offscreen<D>>> {
        if self.is_torn_down() {
            self.ring.signal_presented(slot);
            return None;
        }
        let previous = inner.glass.replace(Glass {
            offscreen,
            slot,
            frame: frame_index,
            presented: false,
        })?;
        if !previous.presented && previous.slot != slot {
            tracing::trace!(
                superseded = previous.frame,
                by = frame_index,
                "dropping unpresented frame"
            );
            self.ring.signal_presented(previous.slot);
        }
        let same = inner
            .glass
            .as_ref()
            .is_some_and(|g| Arc::ptr_eq(&g.offscreen, &previous.offscreen));
        debug_assert!(!same, "offscreen hosted while already on glass");
        (!same).then_some(previous.offscreen)
    }

    // ----- Presenter side -----

    /// Composites the frame on glass into the current layer and presents it.
    ///
    /// Never waits for the painter: if the frame is locked the result is
    /// [`FlushOutcome::Busy`].
    pub fn flush(&self) -> FlushOutcome {
        let (outcome, frame_index, slot) = if self.is_torn_down() {
            (FlushOutcome::NothingToPresent, None, None)
        } else {
            let mut inner = self.inner.lock();
            self.flush_locked(&mut inner)
        };
        tracing::trace!(?outcome, ?frame_index, "flush");
        self.trace(|t| {
            t.flush(&FlushEvent {
                frame_index,
                slot,
                outcome,
            });
        });
        outcome
    }

    fn flush_locked(&self, inner: &mut Inner<D>) -> (FlushOutcome, Option<u64>, Option<SlotIndex>) {
        let Inner {
            glass,
            local,
            remote,
            ..
        } = inner;
        let Some(glass) = glass.as_mut() else {
            return (FlushOutcome::NothingToPresent, None, None);
        };
        let ids = (Some(glass.frame), Some(glass.slot));
        if glass.presented || !glass.offscreen.is_dirty() {
            return (FlushOutcome::Clean, ids.0, ids.1);
        }
        let target: &mut dyn PresentTarget<D> = match remote {
            Some((_, remote)) => remote.as_mut(),
            None => local.as_mut(),
        };
        let Some((drawable, size)) = target.drawable() else {
            return (FlushOutcome::NothingToPresent, ids.0, ids.1);
        };

        let presenting = self.transition(glass.frame, FrameState::Finished, FrameState::Presenting);
        let outcome = match glass.offscreen.try_blit_to(drawable, size.bounds()) {
            Ok(BlitOutcome::Blitted(info)) => {
                target.present();
                glass.presented = true;
                self.ring.signal_presented(glass.slot);
                self.trace(|t| t.blit(&BlitEvent::new(glass.frame, glass.offscreen.id(), &info)));
                FlushOutcome::Presented
            }
            Ok(BlitOutcome::Busy) => FlushOutcome::Busy,
            Err(e) => {
                tracing::warn!(frame_index = glass.frame, %e, "blit to layer failed");
                FlushOutcome::NothingToPresent
            }
        };
        if presenting {
            let to = if outcome == FlushOutcome::Presented {
                FrameState::Idle
            } else {
                FrameState::Finished
            };
            self.transition(glass.frame, FrameState::Presenting, to);
        }
        (outcome, ids.0, ids.1)
    }

    // ----- Remote handoff -----

    /// Presents into the layer named by `handle` from now on.
    ///
    /// If `host` cannot resolve it, presentation continues (or reverts) to
    /// the local layer.
    pub fn attach_remote(
        &self,
        handle: &RemoteHandle,
        host: &dyn LayerHost<D>,
    ) -> PresentationMode {
        match host.resolve(handle) {
            Ok(target) => {
                self.inner.lock().remote = Some((handle.id, target));
                tracing::debug!(endpoint = %handle.endpoint, id = ?handle.id, "presenting remotely");
                PresentationMode::Remote(handle.id)
            }
            Err(error) => {
                tracing::warn!(
                    endpoint = %handle.endpoint,
                    id = ?handle.id,
                    %error,
                    "remote layer unavailable, presenting locally"
                );
                self.inner.lock().remote = None;
                self.trace(|t| {
                    t.handoff_fallback(&HandoffFallbackEvent {
                        layer: handle.id,
                        error,
                    });
                });
                PresentationMode::Local
            }
        }
    }

    /// Goes back to presenting into the local layer.
    pub fn detach_remote(&self) {
        self.inner.lock().remote = None;
    }

    /// Where the next flush goes.
    #[must_use]
    pub fn presentation_mode(&self) -> PresentationMode {
        match &self.inner.lock().remote {
            Some((id, _)) => PresentationMode::Remote(*id),
            None => PresentationMode::Local,
        }
    }

    // ----- Teardown -----

    /// Stops presenting and releases both offscreens.
    ///
    /// Safe to call from any thread, including while a frame is being
    /// painted; that frame is discarded. Later paints fail with
    /// [`FrameError::TornDown`] and flushes present nothing.
    pub fn tear_down(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(glass) = inner.glass.take()
            && !glass.presented
        {
            self.ring.signal_presented(glass.slot);
        }
        inner.painter = None;
        inner.remote = None;
        drop(inner);
        self.set_state(self.frame_index(), FrameState::Idle);
        tracing::debug!("layer bridge torn down");
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Everything the painter can do while recording one frame.
pub struct Frame<'a, D: Device> {
    bridge: &'a LayerBridge<D>,
    bound: &'a BoundOffscreen<'a, D>,
    painting: &'a mut Painting<D>,
    slot: SlotIndex,
    index: u64,
}

impl<D: Device> fmt::Debug for Frame<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("slot", &self.slot)
            .field("bound", self.bound)
            .finish_non_exhaustive()
    }
}

impl<'a, D: Device> Frame<'a, D> {
    /// Monotonic frame counter, starting at 1.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Ring slot this frame's per-frame memory lives in.
    #[must_use]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// The bound offscreen to draw into.
    #[must_use]
    pub fn surface(&self) -> &'a BoundOffscreen<'a, D> {
        self.bound
    }

    /// Backing store size of this frame.
    #[must_use]
    pub fn physical_size(&self) -> PhysicalSize {
        self.bound.physical_size()
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.bridge.device
    }

    /// Reserves `len` bytes of per-frame device memory.
    ///
    /// On [`RingError::CapacityOverrun`] skip the sub-pass that needed the
    /// space; the rest of the frame is unaffected.
    pub fn reserve(&mut self, len: u64) -> Result<Reservation, RingError> {
        let result = self.painting.uploads.reserve_bytes(len);
        if let Err(RingError::CapacityOverrun {
            requested,
            remaining,
            capacity,
        }) = result
        {
            let (frame_index, slot) = (self.index, self.slot);
            self.bridge.trace(|t| {
                t.reserve_overrun(&ReserveOverrunEvent {
                    frame_index,
                    slot,
                    requested,
                    remaining,
                    capacity,
                });
            });
        }
        result
    }

    /// Writes `bytes` into a reservation.
    pub fn write(&self, reservation: &Reservation, bytes: &[u8]) -> Result<(), RingError> {
        self.painting.uploads.write(reservation, bytes)
    }

    /// Reserves room for `data` and writes it.
    pub fn upload<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<Reservation, RingError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let reservation = self.reserve(bytes.len() as u64)?;
        self.write(&reservation, bytes)?;
        Ok(reservation)
    }

    /// Bytes of per-frame memory left in this frame's slot.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.painting.uploads.remaining()
    }

    /// The pipeline for `key`, built on first use and cached per bridge.
    pub fn pipeline(&mut self, key: PipelineKey) -> Result<PipelineId, DeviceError> {
        self.painting.pipelines.get_or_create(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::geometry::PixelRect;
    use crate::remote::{InProcessLayerHost, SharedTarget};
    use crate::resource::CompositeMode;

    type Layer = Arc<Mutex<SoftwareLayer<SoftwareDevice>>>;

    const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);

    fn setup(slots: usize) -> (Arc<SoftwareDevice>, Layer, LayerBridge<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::new());
        let layer = Arc::new(Mutex::new(SoftwareLayer::new(
            device.clone(),
            PhysicalSize::new(4, 4),
        )));
        let mut config = HandoffConfig::default();
        config.ring.slots = slots;
        config.ring.slot_size = 256;
        let bridge = LayerBridge::new(device.clone(), Box::new(layer.clone()), &config).unwrap();
        (device, layer, bridge)
    }

    fn paint_solid(bridge: &LayerBridge<SoftwareDevice>, color: Color) -> Result<(), FrameError> {
        bridge.paint(Size::new(4.0, 4.0), |frame| {
            frame.surface().clear(color).unwrap();
        })
    }

    #[test]
    fn painted_frame_reaches_the_layer() {
        let (_device, layer, bridge) = setup(3);
        paint_solid(&bridge, RED).unwrap();
        assert_eq!(bridge.frame_state(), FrameState::Finished);
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(bridge.frame_state(), FrameState::Idle);
        let layer = layer.lock();
        assert_eq!(layer.presents(), 1);
        let px = layer.pixels().unwrap();
        assert!(px.chunks(4).all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn second_flush_without_paint_is_clean() {
        let (_device, layer, bridge) = setup(3);
        paint_solid(&bridge, RED).unwrap();
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(bridge.flush(), FlushOutcome::Clean);
        assert_eq!(layer.lock().presents(), 1);
    }

    #[test]
    fn flush_before_any_paint_has_nothing() {
        let (_device, layer, bridge) = setup(3);
        assert_eq!(bridge.flush(), FlushOutcome::NothingToPresent);
        assert_eq!(layer.lock().presents(), 0);
    }

    #[test]
    fn frame_without_draws_is_not_handed_off() {
        let (_device, _layer, bridge) = setup(3);
        let slot = bridge.paint(Size::new(4.0, 4.0), |frame| frame.slot()).unwrap();
        assert_eq!(slot.get(), 0);
        assert!(bridge.ring().is_slot_available(slot));
        assert_eq!(bridge.ring().current_buffer_index(), slot);
        assert_eq!(bridge.frame_state(), FrameState::Idle);
        assert_eq!(bridge.flush(), FlushOutcome::NothingToPresent);
    }

    #[test]
    fn newest_frame_wins_and_superseded_slots_free() {
        let (_device, layer, bridge) = setup(2);
        // No flushes: the presenter is slow, the painter never stalls.
        for k in 0..6 {
            let color = if k % 2 == 0 { Color::WHITE } else { RED };
            paint_solid(&bridge, color).unwrap();
        }
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        let layer = layer.lock();
        assert_eq!(layer.presents(), 1);
        assert!(layer.pixels().unwrap().chunks(4).all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn painter_skips_frame_while_slot_is_held() {
        let (_device, _layer, bridge) = setup(1);
        paint_solid(&bridge, RED).unwrap();
        // The only slot waits for the presenter.
        assert!(matches!(
            paint_solid(&bridge, RED),
            Err(FrameError::Ring(RingError::SlotInFlight { .. }))
        ));
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        paint_solid(&bridge, Color::WHITE).unwrap();
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
    }

    #[test]
    fn slots_rotate_per_frame() {
        let (_device, _layer, bridge) = setup(3);
        let slots: Vec<usize> = (0..4)
            .map(|_| {
                bridge
                    .paint(Size::new(4.0, 4.0), |frame| {
                        frame.surface().clear(RED).unwrap();
                        frame.slot().get()
                    })
                    .unwrap()
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);
    }

    #[test]
    fn tear_down_mid_paint_presents_nothing() {
        let (device, layer, bridge) = setup(3);
        let result = bridge.paint(Size::new(4.0, 4.0), |frame| {
            frame.surface().clear(RED).unwrap();
            bridge.tear_down();
        });
        assert!(matches!(result, Err(FrameError::TornDown)));
        assert_eq!(bridge.flush(), FlushOutcome::NothingToPresent);
        assert_eq!(layer.lock().presents(), 0);
        assert!(bridge.ring().is_buffer_available());
        assert!(matches!(paint_solid(&bridge, RED), Err(FrameError::TornDown)));
        // Only the layer framebuffer (never allocated) and no offscreens remain.
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn scale_change_applies_at_next_paint() {
        let (_device, _layer, bridge) = setup(3);
        let size = |bridge: &LayerBridge<SoftwareDevice>| {
            bridge
                .paint(Size::new(100.0, 100.0), |frame| frame.physical_size())
                .unwrap()
        };
        assert_eq!(size(&bridge), PhysicalSize::new(100, 100));
        bridge.notify_scale_factor_changed(2.0);
        assert_eq!(size(&bridge), PhysicalSize::new(200, 200));
    }

    #[test]
    fn nested_paint_is_refused() {
        let (_device, _layer, bridge) = setup(3);
        let inner = bridge
            .paint(Size::new(4.0, 4.0), |_| paint_solid(&bridge, RED))
            .unwrap();
        assert!(matches!(inner, Err(FrameError::AlreadyPainting)));
    }

    #[test]
    fn per_frame_uploads_and_overrun() {
        let (device, _layer, bridge) = setup(3);
        bridge
            .paint(Size::new(4.0, 4.0), |frame| {
                let r = frame.upload(&[1.0_f32, 2.0]).unwrap();
                assert_eq!(r.len, 8);
                let contents = device.buffer_contents(r.buffer).unwrap();
                assert_eq!(&contents[..8], bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0]));
                assert!(matches!(
                    frame.reserve(1024),
                    Err(RingError::CapacityOverrun { requested: 1024, .. })
                ));
                assert!(frame.reserve(16).is_ok());
            })
            .unwrap();
    }

    #[test]
    fn pipelines_are_cached_across_frames() {
        let (device, _layer, bridge) = setup(3);
        let key = PipelineKey::new(CompositeMode::SrcOver, PixelFormat::RgbaPre);
        let a = bridge.paint(Size::new(4.0, 4.0), |f| f.pipeline(key).unwrap()).unwrap();
        let b = bridge.paint(Size::new(4.0, 4.0), |f| f.pipeline(key).unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.live_pipelines(), 1);
    }

    #[test]
    fn remote_layer_receives_frames() {
        let (device, local, bridge) = setup(3);
        let host = InProcessLayerHost::new();
        let remote = Arc::new(Mutex::new(SoftwareLayer::new(
            device.clone(),
            PhysicalSize::new(8, 8),
        )));
        let shared: SharedTarget<SoftwareDevice> = remote.clone();
        let handle = host.register("ui", &shared);

        assert_eq!(
            bridge.attach_remote(&handle, &host),
            PresentationMode::Remote(handle.id)
        );
        paint_solid(&bridge, RED).unwrap();
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(remote.lock().presents(), 1);
        assert_eq!(local.lock().presents(), 0);
        // Scaled 4x4 → 8x8.
        assert_eq!(remote.lock().pixels().unwrap().len(), 8 * 8 * 4);
    }

    #[test]
    fn unresolvable_handle_falls_back_to_local() {
        let (_device, local, bridge) = setup(3);
        let host = InProcessLayerHost::new();
        let handle = RemoteHandle {
            id: RemoteLayerId(7),
            endpoint: "gone".into(),
        };
        assert_eq!(bridge.attach_remote(&handle, &host), PresentationMode::Local);
        assert_eq!(bridge.presentation_mode(), PresentationMode::Local);
        paint_solid(&bridge, RED).unwrap();
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(local.lock().presents(), 1);
    }

    #[test]
    fn unavailable_drawable_keeps_the_frame() {
        let (_device, layer, bridge) = setup(3);
        layer.lock().resize(PhysicalSize::ZERO);
        paint_solid(&bridge, RED).unwrap();
        assert_eq!(bridge.flush(), FlushOutcome::NothingToPresent);
        assert_eq!(bridge.frame_state(), FrameState::Finished);
        layer.lock().resize(PhysicalSize::new(2, 2));
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(layer.lock().pixels().unwrap(), [255_u8, 0, 0, 255].repeat(4));
    }

    #[test]
    fn failed_bind_leaves_glass_alone() {
        let (device, layer, bridge) = setup(3);
        paint_solid(&bridge, RED).unwrap();
        device.fail_allocation_after(0);
        assert!(matches!(
            bridge.paint(Size::new(4.0, 4.0), |_| ()),
            Err(FrameError::Offscreen(OffscreenError::Allocation(_)))
        ));
        assert_eq!(bridge.frame_state(), FrameState::Finished);
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(layer.lock().presents(), 1);
    }

    #[test]
    fn externally_painted_offscreen_can_be_hosted() {
        let (device, layer, bridge) = setup(3);
        let offscreen = Arc::new(Offscreen::new(device.clone(), SurfaceConfig::default()));
        let bound = offscreen.bind_for_size(Size::new(4.0, 4.0)).unwrap();
        bound.clear(RED).unwrap();
        bound.unbind();

        let ring = bridge.ring();
        ring.begin_write().unwrap();
        let slot = ring.update_buffer_in_use().unwrap();
        assert!(bridge.host_offscreen(offscreen, slot).is_none());
        assert_eq!(bridge.frame_state(), FrameState::Finished);
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        assert_eq!(layer.lock().presents(), 1);
        // The device still holds the slot until its work completes.
        assert!(!ring.is_slot_available(slot));
        assert!(ring.signal_completed(slot));
    }

    #[test]
    fn handover_waits_for_present_in_progress() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        struct Gated {
            layer: SoftwareLayer<SoftwareDevice>,
            entered: mpsc::Sender<()>,
            release: mpsc::Receiver<()>,
        }
        impl PresentTarget<SoftwareDevice> for Gated {
            fn drawable(&mut self) -> Option<(TextureId, PhysicalSize)> {
                self.layer.drawable()
            }
            fn present(&mut self) {
                self.entered.send(()).unwrap();
                self.release.recv().unwrap();
                self.layer.present();
            }
        }

        let device = Arc::new(SoftwareDevice::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Gated {
            layer: SoftwareLayer::new(device.clone(), PhysicalSize::new(4, 4)),
            entered: entered_tx,
            release: release_rx,
        };
        let bridge = Arc::new(
            LayerBridge::new(device, Box::new(gated), &HandoffConfig::default()).unwrap(),
        );
        paint_solid(&bridge, RED).unwrap();

        let presenter = {
            let bridge = bridge.clone();
            thread::spawn(move || bridge.flush())
        };
        entered_rx.recv().unwrap();
        let painter = {
            let bridge = bridge.clone();
            thread::spawn(move || paint_solid(&bridge, Color::WHITE))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!painter.is_finished(), "handover should wait for the present");

        release_tx.send(()).unwrap();
        assert_eq!(presenter.join().unwrap(), FlushOutcome::Presented);
        assert!(painter.join().unwrap().is_ok(), "paint completes after present");
        assert_eq!(bridge.frame_state(), FrameState::Finished);
    }

    #[test]
    fn hosting_after_tear_down_stays_idle() {
        let (device, layer, bridge) = setup(3);
        let offscreen = Arc::new(Offscreen::new(device.clone(), SurfaceConfig::default()));
        let bound = offscreen.bind_for_size(Size::new(4.0, 4.0)).unwrap();
        bound.clear(RED).unwrap();
        bound.unbind();

        let ring = bridge.ring();
        ring.begin_write().unwrap();
        let slot = ring.update_buffer_in_use().unwrap();
        bridge.tear_down();
        assert!(bridge.host_offscreen(offscreen, slot).is_none());
        assert_eq!(bridge.frame_state(), FrameState::Idle);
        assert_eq!(bridge.flush(), FlushOutcome::NothingToPresent);
        assert_eq!(layer.lock().presents(), 0);
        // Only the device's hold on the slot remains.
        assert!(ring.signal_completed(slot));
        assert!(ring.is_slot_available(slot));
    }

    #[test]
    fn sub_rect_draws_only_touch_their_region() {
        let (_device, layer, bridge) = setup(3);
        bridge.set_background_color(Color::WHITE);
        bridge
            .paint(Size::new(4.0, 4.0), |frame| {
                frame
                    .surface()
                    .fill_rect(PixelRect::new(0, 0, 1, 1), RED)
                    .unwrap();
            })
            .unwrap();
        assert_eq!(bridge.flush(), FlushOutcome::Presented);
        let px = layer.lock().pixels().unwrap();
        assert_eq!(&px[..4], &[255, 0, 0, 255]);
        assert_eq!(&px[4..8], &[255, 255, 255, 255]);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn trace_events_follow_the_frame() {
        use crate::remote::HandoffError;

        #[derive(Default)]
        struct Log(Arc<Mutex<Vec<String>>>);
        impl TraceSink for Log {
            fn on_bind(&mut self, e: &BindEvent) {
                self.0.lock().push(format!("bind {}", e.frame_index));
            }
            fn on_flush(&mut self, e: &FlushEvent) {
                self.0.lock().push(format!("flush {:?}", e.outcome));
            }
            fn on_reserve_overrun(&mut self, e: &ReserveOverrunEvent) {
                self.0.lock().push(format!("overrun {}", e.requested));
            }
            fn on_handoff_fallback(&mut self, e: &HandoffFallbackEvent) {
                assert!(matches!(e.error, HandoffError::UnknownEndpoint(_)));
                self.0.lock().push("fallback".into());
            }
        }

        let (_device, _layer, bridge) = setup(3);
        let log = Log::default();
        let lines = log.0.clone();
        bridge.set_trace_sink(log);
        bridge
            .paint(Size::new(4.0, 4.0), |frame| {
                frame.surface().clear(RED).unwrap();
                let _ = frame.reserve(4096);
            })
            .unwrap();
        let _ = bridge.flush();
        let host = InProcessLayerHost::new();
        let handle = RemoteHandle {
            id: RemoteLayerId(1),
            endpoint: "nowhere".into(),
        };
        let _ = bridge.attach_remote(&handle, &host);
        assert_eq!(
            *lines.lock(),
            ["bind 1", "overrun 4096", "flush Presented", "fallback"]
        );
    }
}
