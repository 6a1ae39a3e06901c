//! Built-in tiling strategies.
//!
//! | Operator | Operands | Partition axis |
//! |----------|----------|----------------|
//! | `elementwise` | 1 to 4 broadcastable inputs | last |
//! | `gather_elements` | `data`, `index` | `axis` attribute |
//! | `scatter_elements` | `var`, `index`, `updates` | `axis` attribute |
//! | `window_reduce` | `input` | last |

mod elementwise;
mod gather;
mod scatter;
mod window;

pub use elementwise::Elementwise;
pub use gather::GatherElements;
pub use scatter::ScatterElements;
pub use window::WindowReduce;

use crate::{TilingError, TilingInput, TilingResult, TilingStrategy};
use lanetile_shape::{MergedShapes, Shape, ShapeError};

/// Every built-in strategy.
#[must_use]
pub fn builtin() -> Vec<Box<dyn TilingStrategy>> {
    vec![
        Box::new(Elementwise),
        Box::new(GatherElements),
        Box::new(ScatterElements),
        Box::new(WindowReduce),
    ]
}

/// Check that `input` has between `min` and `max` operands.
fn expect_operands(
    operator: &'static str,
    input: &TilingInput,
    min: usize,
    max: usize,
) -> TilingResult<()> {
    let got = input.operands.len();
    if (min..=max).contains(&got) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{min} to {max}")
    };
    Err(TilingError::OperandCount {
        operator,
        expected,
        got,
    })
}

/// Treat a rank-0 shape as a one-element vector.
fn at_least_1d(shape: &Shape) -> Shape {
    if shape.is_scalar() {
        Shape::vector(1)
    } else {
        shape.clone()
    }
}

/// Output rows: the product of the largest size of every leading axis.
fn output_leading(merged: &MergedShapes) -> TilingResult<u64> {
    let mut rows = 1u64;
    for axis in 0..merged.partition_axis() {
        let size = merged
            .shapes()
            .iter()
            .map(|s| s.dims()[axis])
            .max()
            .unwrap_or(1);
        rows = rows.checked_mul(size).ok_or(ShapeError::Overflow)?;
    }
    Ok(rows)
}

/// Largest of `lens` divided by the smallest.
fn row_ratio(lens: &[u64]) -> u64 {
    let max = lens.iter().copied().max().unwrap_or(1);
    let min = lens.iter().copied().min().unwrap_or(1).max(1);
    max / min
}
