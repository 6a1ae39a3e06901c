//! `window_reduce`: pooling-style reduction along the last axis.

use super::{at_least_1d, expect_operands};
use crate::{TilingError, TilingInput, TilingResult, TilingStrategy, Workload};
use lanetile_shape::merge_axes;

/// Tiling of `window_reduce(input, window, stride)`.
///
/// Produces `(len - window) / stride + 1` outputs per row. A window longer
/// than one element may straddle a lane boundary when a row is split, so
/// such reductions accumulate.
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowReduce;

impl TilingStrategy for WindowReduce {
    fn name(&self) -> &'static str {
        "window_reduce"
    }

    fn operands(&self) -> &'static [&'static str] {
        &["input"]
    }

    fn describe(&self, input: &TilingInput) -> TilingResult<Workload> {
        expect_operands(self.name(), input, 1, 1)?;
        let operand = &input.operands[0];
        if !operand.dtype.is_float() {
            return Err(TilingError::UnsupportedDType {
                operand: operand.name.clone(),
                dtype: operand.dtype,
            });
        }

        let window = match input.attrs.window {
            Some(w) if w > 0 => w,
            Some(_) => {
                return Err(TilingError::InvalidAttribute {
                    name: "window",
                    reason: "must be at least 1".to_string(),
                })
            }
            None => {
                return Err(TilingError::InvalidAttribute {
                    name: "window",
                    reason: "required".to_string(),
                })
            }
        };
        let stride = input.attrs.stride.unwrap_or(window);
        if stride == 0 {
            return Err(TilingError::InvalidAttribute {
                name: "stride",
                reason: "must be at least 1".to_string(),
            });
        }

        let shape = at_least_1d(&operand.shape);
        let last = shape.rank() - 1;
        let len = shape.dims()[last];
        if len < window {
            return Err(TilingError::EmptyWorkload {
                reason: format!("window {window} is longer than the reduced axis ({len})"),
            });
        }
        let out_len = (len - window) / stride + 1;

        let merged = merge_axes(&[shape], last)?;
        Ok(Workload {
            rows: merged.leading_len(0),
            row_len: len,
            out_row_len: out_len,
            resident_len: 0,
            elem_sizes: input.elem_sizes(),
            row_ratio: 1,
            dtype: operand.dtype,
            accumulates: window > 1,
            split_rows: true,
            merged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OpAttrs, Operand};
    use lanetile_shape::{DType, Shape};

    fn input(dims: &[u64], window: Option<u64>, stride: Option<u64>) -> TilingInput {
        TilingInput::new(vec![Operand::new(
            "input",
            Shape::new(dims.iter().copied()).unwrap(),
            DType::Float32,
        )])
        .with_attrs(OpAttrs {
            window,
            stride,
            ..OpAttrs::default()
        })
    }

    #[test]
    fn test_output_length() {
        let workload = WindowReduce
            .describe(&input(&[2, 3, 100], Some(4), Some(2)))
            .unwrap();
        assert_eq!(workload.rows, 6);
        assert_eq!(workload.row_len, 100);
        assert_eq!(workload.out_row_len, 49);
        assert!(workload.accumulates);
        assert_eq!(workload.merged.shape(0).dims(), &[6, 100]);
    }

    #[test]
    fn test_stride_defaults_to_window() {
        let workload = WindowReduce.describe(&input(&[64], Some(8), None)).unwrap();
        assert_eq!(workload.rows, 1);
        assert_eq!(workload.out_row_len, 8);
    }

    #[test]
    fn test_unit_window_does_not_accumulate() {
        let workload = WindowReduce.describe(&input(&[16], Some(1), None)).unwrap();
        assert!(!workload.accumulates);
        assert_eq!(workload.out_row_len, 16);
    }

    #[test]
    fn test_invalid_attributes() {
        assert!(matches!(
            WindowReduce.describe(&input(&[16], None, None)),
            Err(TilingError::InvalidAttribute { name: "window", .. })
        ));
        assert!(matches!(
            WindowReduce.describe(&input(&[16], Some(0), None)),
            Err(TilingError::InvalidAttribute { name: "window", .. })
        ));
        assert!(matches!(
            WindowReduce.describe(&input(&[16], Some(2), Some(0))),
            Err(TilingError::InvalidAttribute { name: "stride", .. })
        ));
        assert!(matches!(
            WindowReduce.describe(&input(&[3], Some(4), None)),
            Err(TilingError::EmptyWorkload { .. })
        ));
    }

    #[test]
    fn test_rejects_integer_input() {
        let mut bad = input(&[16], Some(2), None);
        bad.operands[0].dtype = DType::Int32;
        assert!(matches!(
            WindowReduce.describe(&bad),
            Err(TilingError::UnsupportedDType { .. })
        ));
    }
}
