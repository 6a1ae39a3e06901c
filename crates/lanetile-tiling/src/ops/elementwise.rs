//! Elementwise operators over broadcastable inputs.
//!
//! Inputs of equal shape are flattened to a single row that the planner
//! splits across lanes in alignment blocks. When some input broadcasts, the
//! last axis is the row and every combination of leading indices is one row.

use super::{at_least_1d, expect_operands, output_leading, row_ratio};
use crate::record::MAX_OPERANDS;
use crate::{TilingError, TilingInput, TilingResult, TilingStrategy, Workload};
use lanetile_shape::{merge_axes, Shape, ShapeError};
use smallvec::SmallVec;

/// Tiling of N-ary elementwise operators.
#[derive(Clone, Copy, Debug, Default)]
pub struct Elementwise;

impl Elementwise {
    /// Left-pad every shape with unit axes to the largest rank.
    fn align_ranks(input: &TilingInput) -> TilingResult<SmallVec<[Shape; 4]>> {
        let shapes: SmallVec<[Shape; 4]> = input
            .operands
            .iter()
            .map(|o| at_least_1d(&o.shape))
            .collect();
        let rank = shapes.iter().map(Shape::rank).max().unwrap_or(1);
        shapes
            .into_iter()
            .map(|s| {
                let pad = rank - s.rank();
                Shape::new(std::iter::repeat(1).take(pad).chain(s.dims().iter().copied()))
                    .map_err(TilingError::from)
            })
            .collect()
    }
}

impl TilingStrategy for Elementwise {
    fn name(&self) -> &'static str {
        "elementwise"
    }

    fn operands(&self) -> &'static [&'static str] {
        &["x0", "x1", "x2", "x3"]
    }

    fn describe(&self, input: &TilingInput) -> TilingResult<Workload> {
        expect_operands(self.name(), input, 1, MAX_OPERANDS)?;
        for operand in &input.operands {
            if operand.dtype.is_complex() {
                return Err(TilingError::UnsupportedDType {
                    operand: operand.name.clone(),
                    dtype: operand.dtype,
                });
            }
        }

        let shapes = Self::align_ranks(input)?;
        let last = shapes[0].rank() - 1;
        let last_sizes: Vec<u64> = shapes.iter().map(|s| s.dims()[last]).collect();
        let widest = last_sizes.iter().copied().max().unwrap_or(1);
        if last_sizes.iter().any(|&d| d != 1 && d != widest) {
            return Err(ShapeError::DimMismatch {
                axis: last,
                sizes: last_sizes,
            }
            .into());
        }

        let broadcast = shapes.iter().any(|s| s != &shapes[0]);
        let merged = if broadcast {
            merge_axes(&shapes, last)?
        } else {
            let total = shapes[0].num_elements().ok_or(ShapeError::Overflow)?;
            let flat: SmallVec<[Shape; 4]> = shapes.iter().map(|_| Shape::vector(total)).collect();
            merge_axes(&flat, 0)?
        };

        let lens: Vec<u64> = (0..merged.operand_count())
            .map(|i| merged.partition_len(i))
            .collect();
        let row_len = lens.iter().copied().max().unwrap_or(1);
        let rows = output_leading(&merged)?;

        Ok(Workload {
            rows,
            row_len,
            out_row_len: row_len,
            resident_len: 0,
            elem_sizes: input.elem_sizes(),
            row_ratio: row_ratio(&lens),
            dtype: input.operands[0].dtype,
            accumulates: false,
            split_rows: true,
            merged,
        })
    }
}
