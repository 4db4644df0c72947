// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CPU implementation of [`Device`].
//!
//! Textures are plain byte vectors in their own [`PixelFormat`]; multisampled
//! textures store a single resolved sample. Scaled blits sample at pixel
//! centers, nearest by default or bilinear after
//! [`SoftwareDevice::set_blit_filter`]. Submission completes synchronously.
//!
//! The device can be given an allocation budget and told to fail a specific
//! upcoming allocation, which is how the allocation-failure paths of the
//! offscreen and ring allocator are exercised.

use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use parking_lot::Mutex;

use super::{
    BufferId, CompletionCallback, Device, DeviceCaps, DeviceError, PipelineId, TextureDesc,
    TextureId,
};
use crate::format::{Color, PixelFormat, PixelLayout};
use crate::geometry::PixelRect;
use crate::resource::pipeline::PipelineKey;

/// Limits reported by a [`SoftwareDevice`] unless overridden.
pub const DEFAULT_SOFTWARE_CAPS: DeviceCaps = DeviceCaps {
    uniform_offset_alignment: 16,
    copy_offset_alignment: 4,
    max_texture_dimension: 16384,
    max_buffer_size: 256 << 20,
    max_samples: 4,
};

/// Sampling used when a blit changes size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlitFilter {
    /// Copy the source pixel whose center is closest.
    #[default]
    Nearest,
    /// Weight the four surrounding source pixels.
    ///
    /// Only 8-bit formats are filtered; float, depth, and YUV blits stay
    /// nearest.
    Linear,
}

impl BlitFilter {
    fn applies_to(self, format: PixelFormat) -> bool {
        self == Self::Linear
            && matches!(
                format,
                PixelFormat::RgbaPre | PixelFormat::BgraPre | PixelFormat::Gray
            )
    }
}

struct CpuTexture {
    desc: TextureDesc,
    data: Vec<u8>,
}

impl CpuTexture {
    fn bounds(&self) -> PixelRect {
        self.desc.size.bounds()
    }

    fn bpp(&self) -> usize {
        self.desc.format.bytes_per_pixel()
    }

    fn row_offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.desc.size.width as usize + x as usize) * self.bpp()
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    textures: HashMap<u64, CpuTexture>,
    buffers: HashMap<u64, Vec<u8>>,
    pipelines: HashMap<u64, PipelineKey>,
    allocated: u64,
    budget: Option<u64>,
    /// Number of allocations to let through before failing one.
    fail_after: Option<u32>,
    submissions: u64,
    filter: BlitFilter,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn charge(&mut self, bytes: u64) -> Result<(), DeviceError> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                return Err(DeviceError::OutOfMemory { requested: bytes });
            }
            Some(n) => self.fail_after = Some(n - 1),
            None => {}
        }
        let total = self.allocated.saturating_add(bytes);
        if self.budget.is_some_and(|budget| total > budget) {
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        self.allocated = total;
        Ok(())
    }

    fn texture(&self, id: TextureId) -> Result<&CpuTexture, DeviceError> {
        self.textures
            .get(&id.raw())
            .ok_or(DeviceError::UnknownTexture(id))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut CpuTexture, DeviceError> {
        self.textures
            .get_mut(&id.raw())
            .ok_or(DeviceError::UnknownTexture(id))
    }
}

/// A [`Device`] that renders into CPU memory.
pub struct SoftwareDevice {
    caps: DeviceCaps,
    state: Mutex<State>,
    current: Mutex<Option<ThreadId>>,
}

impl core::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SoftwareDevice")
            .field("textures", &state.textures.len())
            .field("buffers", &state.buffers.len())
            .field("pipelines", &state.pipelines.len())
            .field("allocated", &state.allocated)
            .field("filter", &state.filter)
            .finish_non_exhaustive()
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Creates a device with [`DEFAULT_SOFTWARE_CAPS`] and no budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_caps(DEFAULT_SOFTWARE_CAPS)
    }

    /// Creates a device reporting the given limits.
    #[must_use]
    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            state: Mutex::new(State::default()),
            current: Mutex::new(None),
        }
    }

    /// Limits the total bytes of live textures and buffers.
    pub fn set_allocation_budget(&self, budget: Option<u64>) {
        self.state.lock().budget = budget;
    }

    /// Selects how scaled blits sample their source.
    pub fn set_blit_filter(&self, filter: BlitFilter) {
        self.state.lock().filter = filter;
    }

    /// Makes one upcoming allocation fail.
    ///
    /// The next `successes` allocations go through; the one after that
    /// fails with [`DeviceError::OutOfMemory`]. The injection is one-shot.
    pub fn fail_allocation_after(&self, successes: u32) {
        self.state.lock().fail_after = Some(successes);
    }

    /// Bytes currently held by live textures and buffers.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated
    }

    /// Number of live textures.
    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Number of live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of live pipelines.
    #[must_use]
    pub fn live_pipelines(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    /// Number of [`Device::submit`] calls so far.
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.state.lock().submissions
    }

    /// Descriptor of a live texture.
    #[must_use]
    pub fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.state.lock().textures.get(&id.raw()).map(|t| t.desc)
    }

    /// Copy of a live buffer's contents.
    #[must_use]
    pub fn buffer_contents(&self, id: BufferId) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&id.raw()).cloned()
    }

    /// Returns `true` if the context is current on the calling thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        *self.current.lock() == Some(thread::current().id())
    }
}

impl Device for SoftwareDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn make_current(&self) {
        *self.current.lock() = Some(thread::current().id());
    }

    fn clear_current(&self) {
        let mut current = self.current.lock();
        if *current == Some(thread::current().id()) {
            *current = None;
        }
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let max = self.caps.max_texture_dimension;
        if desc.size.is_empty() || desc.size.width > max || desc.size.height > max {
            return Err(DeviceError::InvalidSize {
                size: desc.size,
                max,
            });
        }
        if desc.samples() > self.caps.max_samples {
            return Err(DeviceError::Unsupported("sample count above device limit"));
        }
        let mut state = self.state.lock();
        state.charge(desc.byte_size())?;
        let id = state.next_id();
        let len = desc.format.packed_len(desc.size.width, desc.size.height);
        state.textures.insert(
            id,
            CpuTexture {
                desc: *desc,
                data: vec![0; len],
            },
        );
        Ok(TextureId::from_raw(id))
    }

    fn release_texture(&self, id: TextureId) {
        let mut state = self.state.lock();
        if let Some(texture) = state.textures.remove(&id.raw()) {
            state.allocated = state.allocated.saturating_sub(texture.desc.byte_size());
        }
    }

    fn write_texture(
        &self,
        id: TextureId,
        dst: PixelRect,
        data: &[u8],
        layout: PixelLayout,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let texture = state.texture_mut(id)?;
        if !texture.bounds().contains_rect(dst) {
            return Err(DeviceError::OutOfBounds);
        }
        if dst.is_empty() {
            return Ok(());
        }
        let format = texture.desc.format;
        let row_len = dst.width as usize * texture.bpp();
        let needed = layout.offset_of(format, 0, dst.height - 1) + row_len;
        if data.len() < needed {
            return Err(DeviceError::SourceTooShort {
                needed,
                got: data.len(),
            });
        }
        for row in 0..dst.height {
            let src = layout.offset_of(format, 0, row);
            let out = texture.row_offset(dst.x, dst.y + row);
            texture.data[out..out + row_len].copy_from_slice(&data[src..src + row_len]);
        }
        Ok(())
    }

    fn clear(&self, id: TextureId, color: Color) -> Result<(), DeviceError> {
        let bounds = self.state.lock().texture(id)?.bounds();
        self.fill_rect(id, bounds, color)
    }

    fn fill_rect(&self, id: TextureId, rect: PixelRect, color: Color) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let texture = state.texture_mut(id)?;
        if !texture.bounds().contains_rect(rect) {
            return Err(DeviceError::OutOfBounds);
        }
        let pixel = color.encode(texture.desc.format);
        let bpp = texture.bpp();
        for y in rect.y..rect.y + rect.height {
            let start = texture.row_offset(rect.x, y);
            let row = &mut texture.data[start..start + rect.width as usize * bpp];
            for px in row.chunks_exact_mut(bpp) {
                px.copy_from_slice(&pixel);
            }
        }
        Ok(())
    }

    fn blit(
        &self,
        src: TextureId,
        src_rect: PixelRect,
        dst: TextureId,
        dst_rect: PixelRect,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let filter = state.filter;
        let source = state.texture(src)?;
        if !source.bounds().contains_rect(src_rect) {
            return Err(DeviceError::OutOfBounds);
        }
        let src_format = source.desc.format;
        let bpp = source.bpp();
        // Snapshot the source rows so src == dst cannot alias.
        let mut pixels = Vec::with_capacity(src_rect.size().area() as usize * bpp);
        for y in src_rect.y..src_rect.y + src_rect.height {
            let start = source.row_offset(src_rect.x, y);
            pixels.extend_from_slice(&source.data[start..start + src_rect.width as usize * bpp]);
        }

        let target = state.texture_mut(dst)?;
        if !target.bounds().contains_rect(dst_rect) {
            return Err(DeviceError::OutOfBounds);
        }
        let swizzle = match (src_format, target.desc.format) {
            (a, b) if a == b => false,
            (PixelFormat::RgbaPre, PixelFormat::BgraPre)
            | (PixelFormat::BgraPre, PixelFormat::RgbaPre) => true,
            _ => return Err(DeviceError::Unsupported("blit between incompatible formats")),
        };
        if src_rect.is_empty() || dst_rect.is_empty() {
            return Ok(());
        }
        if filter.applies_to(src_format) && src_rect.size() != dst_rect.size() {
            let row = src_rect.width as usize;
            let at = |x: u32, y: u32, c: usize| {
                f64::from(pixels[(y as usize * row + x as usize) * bpp + c])
            };
            for dy in 0..dst_rect.height {
                let (y0, y1, ty) = linear_coord(dy, dst_rect.height, src_rect.height);
                for dx in 0..dst_rect.width {
                    let (x0, x1, tx) = linear_coord(dx, dst_rect.width, src_rect.width);
                    let to = target.row_offset(dst_rect.x + dx, dst_rect.y + dy);
                    let px = &mut target.data[to..to + bpp];
                    for (c, out) in px.iter_mut().enumerate() {
                        let top = lerp(at(x0, y0, c), at(x1, y0, c), tx);
                        let bottom = lerp(at(x0, y1, c), at(x1, y1, c), tx);
                        *out = to_channel(lerp(top, bottom, ty));
                    }
                    if swizzle {
                        px.swap(0, 2);
                    }
                }
            }
            return Ok(());
        }
        for dy in 0..dst_rect.height {
            let sy = sample_coord(dy, dst_rect.height, src_rect.height);
            for dx in 0..dst_rect.width {
                let sx = sample_coord(dx, dst_rect.width, src_rect.width);
                let from = (sy as usize * src_rect.width as usize + sx as usize) * bpp;
                let to = target.row_offset(dst_rect.x + dx, dst_rect.y + dy);
                let px = &mut target.data[to..to + bpp];
                px.copy_from_slice(&pixels[from..from + bpp]);
                if swizzle {
                    px.swap(0, 2);
                }
            }
        }
        Ok(())
    }

    fn read_pixels(&self, id: TextureId, rect: PixelRect) -> Result<Vec<u8>, DeviceError> {
        let state = self.state.lock();
        let texture = state.texture(id)?;
        if !texture.bounds().contains_rect(rect) {
            return Err(DeviceError::OutOfBounds);
        }
        let row_len = rect.width as usize * texture.bpp();
        let mut out = Vec::with_capacity(row_len * rect.height as usize);
        for y in rect.y..rect.y + rect.height {
            let start = texture.row_offset(rect.x, y);
            out.extend_from_slice(&texture.data[start..start + row_len]);
        }
        Ok(out)
    }

    fn create_buffer(&self, size: u64) -> Result<BufferId, DeviceError> {
        if size == 0 || size > self.caps.max_buffer_size {
            return Err(DeviceError::OutOfMemory { requested: size });
        }
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory { requested: size })?;
        let mut state = self.state.lock();
        state.charge(size)?;
        let id = state.next_id();
        state.buffers.insert(id, vec![0; len]);
        Ok(BufferId::from_raw(id))
    }

    fn write_buffer(&self, id: BufferId, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let buffer = state
            .buffers
            .get_mut(&id.raw())
            .ok_or(DeviceError::UnknownBuffer(id))?;
        let start = usize::try_from(offset).map_err(|_| DeviceError::OutOfBounds)?;
        let end = start
            .checked_add(bytes.len())
            .filter(|&end| end <= buffer.len())
            .ok_or(DeviceError::OutOfBounds)?;
        buffer[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn release_buffer(&self, id: BufferId) {
        let mut state = self.state.lock();
        if let Some(buffer) = state.buffers.remove(&id.raw()) {
            state.allocated = state.allocated.saturating_sub(buffer.len() as u64);
        }
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Result<PipelineId, DeviceError> {
        if !key.format.is_renderable() {
            return Err(DeviceError::Unsupported("pipeline target format"));
        }
        if key.samples == 0 || key.samples > self.caps.max_samples {
            return Err(DeviceError::Unsupported("pipeline sample count"));
        }
        let mut state = self.state.lock();
        let id = state.next_id();
        state.pipelines.insert(id, *key);
        Ok(PipelineId::from_raw(id))
    }

    fn release_pipeline(&self, id: PipelineId) {
        self.state.lock().pipelines.remove(&id.raw());
    }

    fn submit(&self, on_complete: CompletionCallback) {
        self.state.lock().submissions += 1;
        on_complete();
    }
}

/// Maps destination pixel `d` (of `dst_len`) to the source pixel whose
/// center is nearest, for a source of `src_len` pixels.
#[expect(
    clippy::cast_possible_truncation,
    reason = "result is below src_len, which is a u32"
)]
fn sample_coord(d: u32, dst_len: u32, src_len: u32) -> u32 {
    if dst_len == src_len {
        return d;
    }
    let s = (u64::from(d) * 2 + 1) * u64::from(src_len) / (u64::from(dst_len) * 2);
    s.min(u64::from(src_len) - 1) as u32
}

/// Maps destination pixel `d` to the two source pixels around its center
/// and the weight of the second.
#[expect(
    clippy::cast_possible_truncation,
    reason = "u is clamped to [0, src_len - 1]"
)]
fn linear_coord(d: u32, dst_len: u32, src_len: u32) -> (u32, u32, f64) {
    let last = src_len - 1;
    let u = ((f64::from(d) + 0.5) * f64::from(src_len) / f64::from(dst_len) - 0.5)
        .clamp(0.0, f64::from(last));
    let i = u.floor();
    let x0 = i as u32;
    (x0, (x0 + 1).min(last), u - i)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "clamped to the u8 range first"
)]
fn to_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
