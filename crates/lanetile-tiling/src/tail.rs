//! Tail resolution for split axes.
//!
//! An axis of `total` items cut into chunks of `chunk` items has
//! `count = ceil(total / chunk)` chunks, the last of which may be short.
//! The last chunk is never zero: an even split reports a tail equal to the
//! chunk. Alignment padding is recomputed from the tail, since only the tail
//! can end off a block boundary.

use crate::{align_up, ceil_div};
use serde::{Deserialize, Serialize};

/// Chunking of one split axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisTail {
    /// Number of chunks.
    pub count: u64,
    /// Size of every chunk but the last.
    pub chunk: u64,
    /// Size of the last chunk.
    pub tail: u64,
    /// Last chunk padded to the alignment block.
    pub tail_aligned: u64,
    /// Padding elements after the last chunk.
    pub tail_pad: u64,
}

/// Computes [`AxisTail`]s for one alignment block size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TailResolver {
    block_elems: u64,
}

impl TailResolver {
    /// Create a resolver for blocks of `block_elems` elements.
    #[must_use]
    pub fn new(block_elems: u64) -> Self {
        Self {
            block_elems: block_elems.max(1),
        }
    }

    /// Elements per alignment block.
    #[must_use]
    pub const fn block_elems(&self) -> u64 {
        self.block_elems
    }

    /// Cut `total` items into chunks of `chunk` items.
    ///
    /// A zero `total` yields zero chunks.
    #[must_use]
    pub fn resolve(&self, total: u64, chunk: u64) -> AxisTail {
        let chunk = chunk.max(1).min(total.max(1));
        self.resolve_groups(total, chunk, ceil_div(total, chunk))
    }

    /// Last chunk of `count` groups of `chunk` items covering `total`.
    ///
    /// Substitutes `chunk` when the remainder is zero.
    #[must_use]
    pub fn resolve_groups(&self, total: u64, chunk: u64, count: u64) -> AxisTail {
        if count == 0 {
            return AxisTail {
                chunk,
                ..AxisTail::default()
            };
        }
        let covered = chunk.saturating_mul(count - 1);
        let tail = match total.saturating_sub(covered) {
            0 => chunk,
            t => t,
        };
        let tail_aligned = align_up(tail, self.block_elems).unwrap_or(tail);
        AxisTail {
            count,
            chunk,
            tail,
            tail_aligned,
            tail_pad: tail_aligned - tail,
        }
    }

    /// Whether a lane writing `chunk_elems` contiguous output elements
    /// cannot cover a whole alignment block of its own.
    ///
    /// Such writes share a block with a neighbouring lane, so the block must
    /// be accumulated atomically.
    #[must_use]
    pub const fn splits_block(&self, chunk_elems: u64) -> bool {
        chunk_elems != 0 && chunk_elems < self.block_elems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_remainder() {
        let tail = TailResolver::new(8).resolve(1000, 32);
        assert_eq!(tail.count, 32);
        assert_eq!(tail.chunk, 32);
        assert_eq!(tail.tail, 8);
        assert_eq!(tail.tail_aligned, 8);
        assert_eq!(tail.tail_pad, 0);
    }

    #[test]
    fn test_resolve_even_split() {
        let tail = TailResolver::new(8).resolve(96, 32);
        assert_eq!(tail.count, 3);
        assert_eq!(tail.tail, 32);
    }

    #[test]
    fn test_tail_padding() {
        let tail = TailResolver::new(8).resolve(1001, 100);
        assert_eq!(tail.count, 11);
        assert_eq!(tail.tail, 1);
        assert_eq!(tail.tail_aligned, 8);
        assert_eq!(tail.tail_pad, 7);
    }

    #[test]
    fn test_chunk_larger_than_total() {
        let tail = TailResolver::new(8).resolve(5, 64);
        assert_eq!(tail.count, 1);
        assert_eq!(tail.chunk, 5);
        assert_eq!(tail.tail, 5);
    }

    #[test]
    fn test_zero_remainder_substitutes_chunk() {
        let tail = TailResolver::new(1).resolve_groups(12, 3, 5);
        assert_eq!(tail.tail, 3);
        let empty = TailResolver::new(1).resolve(0, 3);
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_splits_block() {
        let resolver = TailResolver::new(8);
        assert!(resolver.splits_block(3));
        assert!(!resolver.splits_block(8));
        assert!(!resolver.splits_block(13));
        assert!(!resolver.splits_block(0));
    }
}
