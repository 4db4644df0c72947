// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pipeline-state cache keyed by composite mode.
//!
//! Pipelines are expensive to build and cheap to look up, so they are cached
//! per device. The cache is bounded: once it holds `capacity` entries the
//! least recently used pipeline is evicted and released on the device.

use core::fmt;
use core::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::device::{Device, DeviceError, PipelineId};
use crate::format::PixelFormat;

/// Porter-Duff style blending applied when compositing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompositeMode {
    /// Destination becomes transparent.
    Clear,
    /// Source replaces destination.
    Src,
    /// Source over destination.
    SrcOver,
    /// Destination kept where source is transparent.
    DstOut,
    /// Additive.
    Add,
}

/// Everything that distinguishes one pipeline from another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// Blend mode.
    pub mode: CompositeMode,
    /// Render target format.
    pub format: PixelFormat,
    /// Render target sample count.
    pub samples: u32,
}

impl PipelineKey {
    /// Key for a single-sample target.
    #[must_use]
    pub const fn new(mode: CompositeMode, format: PixelFormat) -> Self {
        Self {
            mode,
            format,
            samples: 1,
        }
    }
}

/// Bounded LRU cache of device pipelines.
pub struct PipelineCache<D: Device> {
    device: Arc<D>,
    entries: LruCache<PipelineKey, PipelineId>,
    hits: u64,
    misses: u64,
}

impl<D: Device> fmt::Debug for PipelineCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl<D: Device> PipelineCache<D> {
    /// Creates an empty cache holding at most `capacity` pipelines.
    #[must_use]
    pub fn new(device: Arc<D>, capacity: NonZeroUsize) -> Self {
        Self {
            device,
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the pipeline for `key`, building it on a miss.
    pub fn get_or_create(&mut self, key: PipelineKey) -> Result<PipelineId, DeviceError> {
        if let Some(&id) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(id);
        }
        self.misses += 1;
        let id = self.device.create_pipeline(&key)?;
        if let Some((evicted_key, evicted)) = self.entries.push(key, id) {
            tracing::debug!(?evicted_key, "evicting pipeline");
            self.device.release_pipeline(evicted);
        }
        Ok(id)
    }

    /// Returns `true` if `key` is cached, without touching recency.
    #[must_use]
    pub fn contains(&self, key: &PipelineKey) -> bool {
        self.entries.contains(key)
    }

    /// Number of cached pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of cached pipelines.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// `(hits, misses)` since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Releases every cached pipeline.
    pub fn clear(&mut self) {
        while let Some((_, id)) = self.entries.pop_lru() {
            self.device.release_pipeline(id);
        }
    }
}

impl<D: Device> Drop for PipelineCache<D> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    fn key(mode: CompositeMode) -> PipelineKey {
        PipelineKey::new(mode, PixelFormat::RgbaPre)
    }

    #[test]
    fn hit_returns_same_pipeline() {
        let device = Arc::new(SoftwareDevice::new());
        let mut cache = PipelineCache::new(device.clone(), NonZeroUsize::new(4).unwrap());
        let a = cache.get_or_create(key(CompositeMode::SrcOver)).unwrap();
        let b = cache.get_or_create(key(CompositeMode::SrcOver)).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(device.live_pipelines(), 1);
    }

    #[test]
    fn eviction_releases_least_recent() {
        let device = Arc::new(SoftwareDevice::new());
        let mut cache = PipelineCache::new(device.clone(), NonZeroUsize::new(2).unwrap());
        cache.get_or_create(key(CompositeMode::Src)).unwrap();
        cache.get_or_create(key(CompositeMode::SrcOver)).unwrap();
        // Touch Src so SrcOver becomes the eviction candidate.
        cache.get_or_create(key(CompositeMode::Src)).unwrap();
        cache.get_or_create(key(CompositeMode::Add)).unwrap();

        assert!(cache.contains(&key(CompositeMode::Src)));
        assert!(!cache.contains(&key(CompositeMode::SrcOver)));
        assert_eq!(device.live_pipelines(), 2);
    }

    #[test]
    fn drop_releases_everything() {
        let device = Arc::new(SoftwareDevice::new());
        {
            let mut cache = PipelineCache::new(device.clone(), NonZeroUsize::new(8).unwrap());
            cache.get_or_create(key(CompositeMode::Clear)).unwrap();
            cache.get_or_create(key(CompositeMode::DstOut)).unwrap();
        }
        assert_eq!(device.live_pipelines(), 0);
    }

    #[test]
    fn unsupported_key_is_not_cached() {
        let device = Arc::new(SoftwareDevice::new());
        let mut cache = PipelineCache::new(device, NonZeroUsize::new(2).unwrap());
        let gray = PipelineKey::new(CompositeMode::Src, PixelFormat::Gray);
        assert!(cache.get_or_create(gray).is_err());
        assert!(cache.is_empty());
    }
}
