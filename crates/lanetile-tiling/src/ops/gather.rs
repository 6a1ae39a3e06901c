//! `gather_elements`: pick data elements along one axis by index.
//!
//! Output follows the shape of `index`. Every index row reads anywhere in the
//! matching data row, so the whole data row stays resident while the index
//! row streams through.

use super::{expect_operands, row_ratio};
use crate::{TilingError, TilingInput, TilingResult, TilingStrategy, Workload};
use lanetile_shape::{merge_axes, Axis, ShapeError};

/// Tiling of `gather_elements(data, index, axis)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct GatherElements;

impl TilingStrategy for GatherElements {
    fn name(&self) -> &'static str {
        "gather_elements"
    }

    fn operands(&self) -> &'static [&'static str] {
        &["data", "index"]
    }

    fn describe(&self, input: &TilingInput) -> TilingResult<Workload> {
        expect_operands(self.name(), input, 2, 2)?;
        let (data, index) = (&input.operands[0], &input.operands[1]);
        if !index.dtype.is_integer() {
            return Err(TilingError::UnsupportedDType {
                operand: index.name.clone(),
                dtype: index.dtype,
            });
        }
        if data.shape.is_scalar() {
            return Err(ShapeError::AxisOutOfRange { axis: 0, rank: 0 }.into());
        }

        let axis = input
            .attrs
            .axis
            .unwrap_or(Axis::new(0))
            .normalize(data.shape.rank())?;
        let merged = merge_axes(&[data.shape.clone(), index.shape.clone()], axis)?;

        let data_len = merged.partition_len(0);
        let index_len = merged.partition_len(1);
        let rows = merged
            .leading_len(1)
            .checked_mul(merged.trailing_len(1))
            .ok_or(ShapeError::Overflow)?;

        Ok(Workload {
            rows,
            row_len: index_len,
            out_row_len: index_len,
            resident_len: data_len.max(index_len),
            elem_sizes: input.elem_sizes(),
            row_ratio: row_ratio(&[data_len, index_len]),
            dtype: data.dtype,
            accumulates: false,
            split_rows: true,
            merged,
        })
    }
}
