// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use core::fmt;

/// Rounds `value` up to a multiple of `alignment`.
///
/// Saturates to the largest aligned `u64` instead of overflowing.
#[must_use]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    match value.checked_add(alignment - 1) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// Linear sub-allocator over `[0, capacity)`.
///
/// Tracks offsets only; the bytes live in a device buffer.
#[derive(Clone)]
pub struct Arena {
    capacity: u64,
    cursor: u64,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arena({}/{})", self.cursor, self.capacity)
    }
}

impl Arena {
    /// An empty arena of `capacity` bytes.
    #[must_use]
    pub const fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cursor: 0,
        }
    }

    /// Rewinds the cursor to zero.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Total bytes.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Next free offset (before alignment).
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Bytes left after the cursor.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.cursor)
    }

    /// Reserves `size` bytes at an `alignment`-aligned offset.
    ///
    /// Returns `None`, leaving the cursor untouched, if the reservation would
    /// run past the end.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let offset = align_up(self.cursor, alignment);
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.cursor = end;
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(33, 32), 64);
        assert_eq!(align_up(u64::MAX, 256), u64::MAX / 256 * 256);
    }

    #[test]
    fn overrun_leaves_cursor_alone() {
        let mut arena = Arena::new(64);
        assert_eq!(arena.alloc(10, 16), Some(0));
        assert_eq!(arena.alloc(10, 16), Some(16));
        assert_eq!(arena.alloc(40, 16), None);
        assert_eq!(arena.cursor(), 26);
        assert_eq!(arena.alloc(32, 32), Some(32));
        assert_eq!(arena.remaining(), 0);
    }
}
