//! Block pairs and alignment arithmetic
//!
//! A block is identified by its starting offset. Sizes are exact byte
//! counts; only offsets (and the ends used for placement math) are rounded
//! to the allocator's alignment.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Smallest alignment accepted by the allocator (direct I/O sector size)
pub const MIN_ALIGNMENT: u64 = 512;

/// An allocated, contiguous byte range in the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPair {
    /// Byte offset of the first byte
    pub offset: u64,
    /// Number of bytes
    pub size: u64,
}

impl BlockPair {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockPair { offset, size }
    }

    /// One past the last byte of this block
    ///
    /// Callers must have checked that `offset + size` fits; the allocator
    /// never holds a block for which it does not.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// `end()` for pairs that have not been validated yet
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

impl PartialOrd for BlockPair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Blocks are ordered by offset alone; size breaks ties only so that Ord
// stays consistent with Eq.
impl Ord for BlockPair {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then(self.size.cmp(&other.size))
    }
}

impl From<(u64, u64)> for BlockPair {
    fn from((offset, size): (u64, u64)) -> Self {
        BlockPair { offset, size }
    }
}

/// Round `value` up to the next multiple of `alignment`
///
/// Saturates at the largest aligned value instead of wrapping; callers
/// that can reach the top of the address space use [`checked_align_up`].
pub fn align_up(value: u64, alignment: u64) -> u64 {
    checked_align_up(value, alignment).unwrap_or(u64::MAX - u64::MAX % alignment)
}

/// Round `value` up to the next multiple of `alignment`, or `None` on overflow
pub fn checked_align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment > 0);
    match value % alignment {
        0 => Some(value),
        rem => value.checked_add(alignment - rem),
    }
}

/// True when `alignment` is usable for direct I/O
pub fn is_valid_alignment(alignment: u64) -> bool {
    alignment >= MIN_ALIGNMENT && alignment % MIN_ALIGNMENT == 0
}
