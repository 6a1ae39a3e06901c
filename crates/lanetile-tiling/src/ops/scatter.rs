//! `scatter_elements`: write updates into `var` at indexed positions.
//!
//! The output is `var` itself, so a `var` row stays resident while the
//! matching index and update rows stream through. With `reduce = add` two
//! lanes sharing a row may hit the same output element.

use super::{expect_operands, row_ratio};
use crate::{ReduceMode, TilingError, TilingInput, TilingResult, TilingStrategy, Workload};
use lanetile_shape::{merge_axes, Axis, DType, Shape, ShapeError};

/// Tiling of `scatter_elements(var, index, updates, axis, reduce)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScatterElements;

impl TilingStrategy for ScatterElements {
    fn name(&self) -> &'static str {
        "scatter_elements"
    }

    fn operands(&self) -> &'static [&'static str] {
        &["var", "index", "updates"]
    }

    fn describe(&self, input: &TilingInput) -> TilingResult<Workload> {
        expect_operands(self.name(), input, 3, 3)?;
        let (var, index, updates) = (&input.operands[0], &input.operands[1], &input.operands[2]);
        if !index.dtype.is_integer() {
            return Err(TilingError::UnsupportedDType {
                operand: index.name.clone(),
                dtype: index.dtype,
            });
        }
        if updates.dtype != var.dtype {
            return Err(TilingError::UnsupportedDType {
                operand: updates.name.clone(),
                dtype: updates.dtype,
            });
        }
        let reduce = input.attrs.reduce;
        if reduce == ReduceMode::Add && (var.dtype == DType::Bool || var.dtype.is_complex()) {
            return Err(TilingError::UnsupportedDType {
                operand: var.name.clone(),
                dtype: var.dtype,
            });
        }
        if var.shape.is_scalar() {
            return Err(ShapeError::AxisOutOfRange { axis: 0, rank: 0 }.into());
        }

        // A one-element update broadcasts over the whole index tensor.
        let updates_shape = if updates.shape.num_elements() == Some(1) {
            Shape::new(std::iter::repeat(1).take(index.shape.rank()))?
        } else {
            if updates.shape.rank() != index.shape.rank() {
                return Err(ShapeError::RankMismatch {
                    operand: 2,
                    expected: index.shape.rank(),
                    got: updates.shape.rank(),
                }
                .into());
            }
            if let Some(axis) = (0..index.shape.rank())
                .find(|&a| updates.shape.dims()[a] != index.shape.dims()[a])
            {
                return Err(ShapeError::DimMismatch {
                    axis,
                    sizes: vec![index.shape.dims()[axis], updates.shape.dims()[axis]],
                }
                .into());
            }
            updates.shape.clone()
        };

        let axis = input
            .attrs
            .axis
            .unwrap_or(Axis::new(0))
            .normalize(var.shape.rank())?;
        let merged = merge_axes(&[var.shape.clone(), index.shape.clone(), updates_shape], axis)?;

        let var_len = merged.partition_len(0);
        let index_len = merged.partition_len(1);
        let rows = merged
            .leading_len(1)
            .checked_mul(merged.trailing_len(1))
            .ok_or(ShapeError::Overflow)?;

        Ok(Workload {
            rows,
            row_len: index_len,
            out_row_len: var_len,
            resident_len: var_len.max(index_len),
            elem_sizes: input.elem_sizes(),
            row_ratio: row_ratio(&[var_len, index_len]),
            dtype: var.dtype,
            accumulates: reduce == ReduceMode::Add,
            split_rows: true,
            merged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OpAttrs, Operand};

    fn input(var: &[u64], index: &[u64], updates: &[u64], reduce: ReduceMode) -> TilingInput {
        TilingInput::new(vec![
            Operand::new("var", Shape::new(var.iter().copied()).unwrap(), DType::Float16),
            Operand::new("index", Shape::new(index.iter().copied()).unwrap(), DType::Int32),
            Operand::new(
                "updates",
                Shape::new(updates.iter().copied()).unwrap(),
                DType::Float16,
            ),
        ])
        .with_attrs(OpAttrs {
            axis: Some(Axis::last()),
            reduce,
            ..OpAttrs::default()
        })
    }

    #[test]
    fn test_scatter_rows() {
        let workload = ScatterElements
            .describe(&input(&[32, 1024], &[32, 16], &[32, 16], ReduceMode::None))
            .unwrap();
        assert_eq!(workload.rows, 32);
        assert_eq!(workload.row_len, 16);
        assert_eq!(workload.out_row_len, 1024);
        assert_eq!(workload.resident_len, 1024);
        assert_eq!(workload.row_ratio, 64);
        assert_eq!(workload.elem_sizes.as_slice(), &[2, 4, 2]);
        assert!(!workload.accumulates);
    }

    #[test]
    fn test_add_accumulates() {
        let workload = ScatterElements
            .describe(&input(&[32, 1024], &[32, 16], &[32, 16], ReduceMode::Add))
            .unwrap();
        assert!(workload.accumulates);
    }

    #[test]
    fn test_scalar_updates_broadcast() {
        let workload = ScatterElements
            .describe(&input(&[8, 64], &[8, 4], &[], ReduceMode::None))
            .unwrap();
        assert_eq!(workload.merged.operand_count(), 3);
        assert_eq!(workload.merged.shape(2).dims(), &[1, 1]);
        assert_eq!(workload.merged.strides(2).values(), &[0, 1]);
    }

    #[test]
    fn test_updates_must_match_index() {
        assert!(matches!(
            ScatterElements.describe(&input(&[8, 64], &[8, 4], &[8, 5], ReduceMode::None)),
            Err(TilingError::ShapeMismatch(ShapeError::DimMismatch { axis: 1, .. }))
        ));
        assert!(matches!(
            ScatterElements.describe(&input(&[8, 64], &[8, 4], &[32], ReduceMode::None)),
            Err(TilingError::ShapeMismatch(ShapeError::RankMismatch { operand: 2, .. }))
        ));
    }

    #[test]
    fn test_dtype_checks() {
        let mut bad = input(&[8, 64], &[8, 4], &[8, 4], ReduceMode::None);
        bad.operands[2].dtype = DType::Float32;
        assert!(matches!(
            ScatterElements.describe(&bad),
            Err(TilingError::UnsupportedDType { operand, .. }) if operand == "updates"
        ));

        let mut bad = input(&[8, 64], &[8, 4], &[8, 4], ReduceMode::Add);
        bad.operands[0].dtype = DType::Bool;
        bad.operands[2].dtype = DType::Bool;
        assert!(matches!(
            ScatterElements.describe(&bad),
            Err(TilingError::UnsupportedDType { operand, .. }) if operand == "var"
        ));
    }
}
