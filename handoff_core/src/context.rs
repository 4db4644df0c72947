// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-thread record of the bound offscreen.
//!
//! A thread draws into at most one offscreen at a time. The record also
//! names the bound render target, which is the default destination for
//! blits issued on that thread.

use core::cell::Cell;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::device::TextureId;

/// Process-unique identity of an offscreen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OffscreenId(u64);

impl OffscreenId {
    /// Rebuilds an identifier from [`get`](Self::get), e.g. when decoding
    /// a recording.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy)]
struct Binding {
    offscreen: OffscreenId,
    target: Option<TextureId>,
}

thread_local! {
    static BOUND: Cell<Option<Binding>> = const { Cell::new(None) };
}

/// The offscreen bound on the calling thread, if any.
#[must_use]
pub fn bound_offscreen() -> Option<OffscreenId> {
    BOUND.with(|b| b.get().map(|b| b.offscreen))
}

/// The render target bound on the calling thread, if any.
#[must_use]
pub fn current_target() -> Option<TextureId> {
    BOUND.with(|b| b.get().and_then(|b| b.target))
}

/// Records `offscreen` as bound on this thread.
///
/// Returns `Ok(false)` if it already was, and the other offscreen if a
/// different one is bound here.
pub(crate) fn enter(offscreen: OffscreenId) -> Result<bool, OffscreenId> {
    BOUND.with(|b| match b.get() {
        Some(bound) if bound.offscreen == offscreen => Ok(false),
        Some(other) => Err(other.offscreen),
        None => {
            b.set(Some(Binding {
                offscreen,
                target: None,
            }));
            Ok(true)
        }
    })
}

/// Publishes the render target of the offscreen bound on this thread.
pub(crate) fn set_target(offscreen: OffscreenId, target: Option<TextureId>) {
    BOUND.with(|b| {
        if let Some(binding) = b.get().filter(|binding| binding.offscreen == offscreen) {
            b.set(Some(Binding { target, ..binding }));
        }
    });
}

/// Clears the record if `offscreen` is the one bound here.
pub(crate) fn leave(offscreen: OffscreenId) {
    BOUND.with(|b| {
        if b.get().is_some_and(|binding| binding.offscreen == offscreen) {
            b.set(None);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_offscreen_is_refused() {
        let a = OffscreenId::next();
        let b = OffscreenId::next();
        assert_eq!(enter(a), Ok(true));
        assert_eq!(enter(b), Err(a));
        set_target(a, Some(TextureId::from_raw(9)));
        // Re-entering the same offscreen keeps its target.
        assert_eq!(enter(a), Ok(false));
        assert_eq!(current_target(), Some(TextureId::from_raw(9)));
        leave(b);
        assert_eq!(bound_offscreen(), Some(a));
        leave(a);
        assert_eq!(bound_offscreen(), None);
        assert_eq!(current_target(), None);
    }

    #[test]
    fn bindings_are_per_thread() {
        let a = OffscreenId::next();
        assert_eq!(enter(a), Ok(true));
        std::thread::spawn(|| assert_eq!(bound_offscreen(), None))
            .join()
            .unwrap();
        leave(a);
    }
}
