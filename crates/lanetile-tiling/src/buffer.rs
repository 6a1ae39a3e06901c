//! # Scratch Buffer Planning
//!
//! Decides how much of a row each scratch slot holds.
//!
//! Each operand owns one slot per lane (two when double-buffered). Rows are
//! padded to the alignment block of the narrowest operand, which is a
//! multiple of every wider operand's block.
//!
//! ## Tiers
//!
//! 1. **Batched**: a full aligned row fits, so as many whole rows as fit are
//!    staged per slot (`fits_full_row`).
//! 2. **Sliced**: the row is cut into aligned column slices
//!    (`needs_slicing`).
//! 3. **Scalar**: slices would be empty, too many, or the operand rows are
//!    too lopsided to stage together (`needs_scalar_fallback`).
//!
//! Every emitted plan satisfies
//! `elements_per_slot * sum(elem_sizes) * multiplier <= scratch_capacity`.

use crate::{align_down, align_up, ceil_div, TilingError, TilingResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Input to [`BufferPlanner::plan`].
#[derive(Clone, Copy, Debug)]
pub struct BufferRequest<'a> {
    /// Element size of every staged operand, in bytes.
    pub elem_sizes: &'a [usize],
    /// Elements per row.
    pub row_size: u64,
    /// Scratch bytes available to slots.
    pub scratch_capacity: u64,
    /// Alignment of slot sizes, in bytes. Must be a power of two.
    pub alignment: u32,
    /// Whether slots are double-buffered.
    pub double_buffer: bool,
    /// Largest operand row length divided by the smallest.
    pub row_ratio: u64,
}

impl<'a> BufferRequest<'a> {
    /// Request for equal-length operand rows.
    #[must_use]
    pub const fn new(
        elem_sizes: &'a [usize],
        row_size: u64,
        scratch_capacity: u64,
        alignment: u32,
        double_buffer: bool,
    ) -> Self {
        Self {
            elem_sizes,
            row_size,
            scratch_capacity,
            alignment,
            double_buffer,
            row_ratio: 1,
        }
    }

    /// Set the operand row-length ratio.
    #[must_use]
    pub const fn with_row_ratio(mut self, row_ratio: u64) -> Self {
        self.row_ratio = row_ratio;
        self
    }
}

/// Scratch slot layout for one lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferPlan {
    /// Aligned elements per operand slot.
    pub elements_per_slot: u64,
    /// Whole rows per slot. Zero unless the full row fits.
    pub rows_per_slot: u64,
    /// Whether slots are double-buffered.
    pub double_buffered: bool,
    /// A full aligned row fits in one slot.
    pub fits_full_row: bool,
    /// The row is cut into column slices.
    pub needs_slicing: bool,
    /// Only the scalar tier is safe.
    pub needs_scalar_fallback: bool,
    /// Row length padded to the alignment block.
    pub row_aligned_len: u64,
    /// Elements per alignment block of the narrowest operand.
    pub block_elems: u64,
    /// Slot bytes summed over operands for one aligned row.
    pub bytes_per_row: u64,
    /// Slices per row. Zero when the slot holds no elements.
    pub slice_count: u64,
}

impl BufferPlan {
    /// Buffering multiplier: 2 when double-buffered.
    #[must_use]
    pub const fn multiplier(&self) -> u64 {
        if self.double_buffered {
            2
        } else {
            1
        }
    }

    /// Scratch bytes the plan occupies, given the element sizes it was made
    /// for.
    #[must_use]
    pub fn required_bytes(&self, elem_sizes: &[usize]) -> u64 {
        let sum: u64 = elem_sizes.iter().map(|&e| e as u64).sum();
        self.elements_per_slot
            .saturating_mul(sum)
            .saturating_mul(self.multiplier())
    }
}

impl fmt::Display for BufferPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = if self.needs_scalar_fallback {
            "scalar"
        } else if self.needs_slicing {
            "sliced"
        } else {
            "batched"
        };
        write!(
            f,
            "{tier}: {} elems/slot, {} rows/slot, {} slices, x{}",
            self.elements_per_slot,
            self.rows_per_slot,
            self.slice_count,
            self.multiplier()
        )
    }
}

/// Computes [`BufferPlan`]s under fixed fallback thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPlanner {
    max_slices: u64,
    max_row_ratio: u64,
}

impl Default for BufferPlanner {
    fn default() -> Self {
        Self {
            max_slices: 4096,
            max_row_ratio: 1024,
        }
    }
}

impl BufferPlanner {
    /// Create a planner with the given slice-count ceiling and row-ratio
    /// threshold.
    #[must_use]
    pub const fn new(max_slices: u64, max_row_ratio: u64) -> Self {
        Self {
            max_slices,
            max_row_ratio,
        }
    }

    /// Plan the scratch slots for one row.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no operands, an element size is zero,
    /// or the row is empty.
    pub fn plan(&self, req: &BufferRequest<'_>) -> TilingResult<BufferPlan> {
        let min_elem = req
            .elem_sizes
            .iter()
            .copied()
            .min()
            .ok_or_else(|| TilingError::EmptyWorkload {
                reason: "no operands to stage".to_string(),
            })?;
        if min_elem == 0 {
            return Err(TilingError::ZeroElementSize);
        }
        if req.row_size == 0 {
            return Err(TilingError::EmptyWorkload {
                reason: "row has no elements".to_string(),
            });
        }

        let sum: u64 = req.elem_sizes.iter().map(|&e| e as u64).sum();
        let multiplier: u64 = if req.double_buffer { 2 } else { 1 };
        let block_elems = (u64::from(req.alignment) / min_elem as u64).max(1);
        let row_aligned_len = align_up(req.row_size, block_elems).unwrap_or(u64::MAX);
        let bytes_per_row = sum.saturating_mul(row_aligned_len);

        let mut plan = BufferPlan {
            elements_per_slot: 0,
            rows_per_slot: 0,
            double_buffered: req.double_buffer,
            fits_full_row: false,
            needs_slicing: false,
            needs_scalar_fallback: false,
            row_aligned_len,
            block_elems,
            bytes_per_row,
            slice_count: 0,
        };

        if bytes_per_row.saturating_mul(multiplier) <= req.scratch_capacity {
            plan.fits_full_row = true;
            plan.rows_per_slot = (req.scratch_capacity / multiplier) / bytes_per_row;
            plan.elements_per_slot = plan.rows_per_slot * row_aligned_len;
            plan.slice_count = 1;
            return Ok(plan);
        }

        plan.needs_slicing = true;
        plan.elements_per_slot = align_down(req.scratch_capacity / (sum * multiplier), block_elems);
        if plan.elements_per_slot > 0 {
            plan.slice_count = ceil_div(req.row_size, plan.elements_per_slot);
        }
        plan.needs_scalar_fallback = plan.elements_per_slot == 0
            || plan.slice_count > self.max_slices
            || req.row_ratio > self.max_row_ratio;

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_row_batches() {
        let planner = BufferPlanner::default();
        let plan = planner
            .plan(&BufferRequest::new(&[4, 4], 1000, 196_608, 32, true))
            .unwrap();
        assert!(plan.fits_full_row);
        assert!(!plan.needs_slicing);
        assert_eq!(plan.bytes_per_row, 8000);
        assert_eq!(plan.rows_per_slot, 12);
        assert_eq!(plan.elements_per_slot, 12_000);
        assert!(plan.required_bytes(&[4, 4]) <= 196_608);
    }

    #[test]
    fn test_row_padded_to_block() {
        let planner = BufferPlanner::default();
        let plan = planner
            .plan(&BufferRequest::new(&[2, 4], 9, 4096, 32, false))
            .unwrap();
        assert_eq!(plan.block_elems, 16);
        assert_eq!(plan.row_aligned_len, 16);
        assert_eq!(plan.bytes_per_row, 96);
    }

    #[test]
    fn test_sliced_row() {
        let planner = BufferPlanner::default();
        let plan = planner
            .plan(&BufferRequest::new(&[4, 4], 1000, 256, 32, false))
            .unwrap();
        assert!(plan.needs_slicing);
        assert!(!plan.fits_full_row);
        assert!(!plan.needs_scalar_fallback);
        assert_eq!(plan.elements_per_slot, 32);
        assert_eq!(plan.slice_count, 32);
        assert!(plan.required_bytes(&[4, 4]) <= 256);
    }

    #[test]
    fn test_scalar_when_nothing_fits() {
        let planner = BufferPlanner::default();
        let plan = planner
            .plan(&BufferRequest::new(&[4, 4], 1000, 4, 32, false))
            .unwrap();
        assert!(plan.needs_scalar_fallback);
        assert_eq!(plan.elements_per_slot, 0);
    }

    #[test]
    fn test_scalar_when_too_many_slices() {
        let planner = BufferPlanner::new(16, 1024);
        let plan = planner
            .plan(&BufferRequest::new(&[4, 4], 1000, 256, 32, false))
            .unwrap();
        assert_eq!(plan.slice_count, 32);
        assert!(plan.needs_scalar_fallback);
    }

    #[test]
    fn test_scalar_when_rows_lopsided() {
        let planner = BufferPlanner::new(4096, 64);
        let req = BufferRequest::new(&[4, 4], 65_536, 196_608, 32, true).with_row_ratio(32_768);
        let plan = planner.plan(&req).unwrap();
        assert!(plan.needs_slicing);
        assert!(plan.needs_scalar_fallback);
    }

    #[test]
    fn test_double_buffer_halves_slot() {
        let planner = BufferPlanner::default();
        let single = planner
            .plan(&BufferRequest::new(&[4, 4], 1000, 256, 32, false))
            .unwrap();
        let double = planner
            .plan(&BufferRequest::new(&[4, 4], 1000, 256, 32, true))
            .unwrap();
        assert_eq!(double.elements_per_slot, 16);
        assert!(double.elements_per_slot < single.elements_per_slot);
    }

    #[test]
    fn test_invalid_requests() {
        let planner = BufferPlanner::default();
        assert!(matches!(
            planner.plan(&BufferRequest::new(&[], 10, 256, 32, false)),
            Err(TilingError::EmptyWorkload { .. })
        ));
        assert!(matches!(
            planner.plan(&BufferRequest::new(&[0, 4], 10, 256, 32, false)),
            Err(TilingError::ZeroElementSize)
        ));
        assert!(matches!(
            planner.plan(&BufferRequest::new(&[4], 0, 256, 32, false)),
            Err(TilingError::EmptyWorkload { .. })
        ));
    }
}
