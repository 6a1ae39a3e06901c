//! Axis merging for co-iterating operands.
//!
//! Adjacent axes whose sizes agree across every operand address memory the
//! same way in all of them, so they can be collapsed into a single axis whose
//! size is the product of the run. The partition axis is never merged, and
//! runs do not cross it.
//!
//! Broadcast axes (some operands of size 1, the rest of one common size) are
//! kept as standalone axes with a zero stride in the broadcast operands.
//! Axes of size 1 in every operand carry no addressing information and are
//! dropped.

use crate::{Shape, ShapeError, Strides};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// Role of an axis relative to the partition axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisRole {
    /// Batch axis before the partition axis.
    Leading,
    /// The axis split across lanes.
    Partition,
    /// Contiguous axis after the partition axis.
    Trailing,
}

impl AxisRole {
    /// Get the name of this role.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Leading => "leading",
            Self::Partition => "partition",
            Self::Trailing => "trailing",
        }
    }
}

impl fmt::Display for AxisRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Operand shapes after merging, with one role per merged axis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedShapes {
    shapes: SmallVec<[Shape; 4]>,
    roles: SmallVec<[AxisRole; 8]>,
    partition_axis: usize,
}

impl MergedShapes {
    /// Number of operands.
    #[must_use]
    pub fn operand_count(&self) -> usize {
        self.shapes.len()
    }

    /// Rank shared by all merged operands.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.roles.len()
    }

    /// Merged shape of one operand.
    #[must_use]
    pub fn shape(&self, operand: usize) -> &Shape {
        &self.shapes[operand]
    }

    /// All merged shapes.
    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// Role of every merged axis.
    #[must_use]
    pub fn roles(&self) -> &[AxisRole] {
        &self.roles
    }

    /// Index of the partition axis in the merged shapes.
    #[must_use]
    pub const fn partition_axis(&self) -> usize {
        self.partition_axis
    }

    /// Product of the axes before the partition axis.
    #[must_use]
    pub fn leading_len(&self, operand: usize) -> u64 {
        self.shapes[operand].dims()[..self.partition_axis].iter().product()
    }

    /// Size of the partition axis.
    #[must_use]
    pub fn partition_len(&self, operand: usize) -> u64 {
        self.shapes[operand].dims()[self.partition_axis]
    }

    /// Product of the axes after the partition axis.
    #[must_use]
    pub fn trailing_len(&self, operand: usize) -> u64 {
        self.shapes[operand].dims()[self.partition_axis + 1..]
            .iter()
            .product()
    }

    /// Whether the partition axis is not innermost in memory.
    ///
    /// Such operands must be reorganized before the partition axis can be
    /// addressed contiguously.
    #[must_use]
    pub fn needs_transpose(&self) -> bool {
        (0..self.operand_count()).any(|i| self.trailing_len(i) > 1)
    }

    /// Element strides of one operand over the merged shape.
    ///
    /// Broadcast axes get a stride of zero.
    #[must_use]
    pub fn strides(&self, operand: usize) -> Strides {
        let shape = &self.shapes[operand];
        let mut strides: SmallVec<[i64; 8]> = SmallVec::with_capacity(shape.rank());
        let mut stride: i64 = 1;
        for axis in (0..shape.rank()).rev() {
            let dim = shape.dims()[axis];
            let broadcast = axis != self.partition_axis
                && dim == 1
                && self.shapes.iter().any(|s| s.dims()[axis] > 1);
            strides.push(if broadcast { 0 } else { stride });
            stride = stride.saturating_mul(i64::try_from(dim).unwrap_or(i64::MAX));
        }
        strides.reverse();
        Strides::new(strides)
    }
}

/// Accumulates a run of axes that agree across all operands.
struct Run {
    size: u64,
    role: AxisRole,
}

/// Merge co-iterating operand shapes around `partition_axis`.
///
/// Axes other than the partition axis must agree across operands, or be
/// broadcast (size 1 in some operands). The partition axis may differ
/// freely.
///
/// # Errors
///
/// Returns an error if there are no operands, the ranks differ, the axis is
/// out of range, an element count overflows, or a non-partition axis
/// mismatches outside the broadcast case.
pub fn merge_axes(shapes: &[Shape], partition_axis: usize) -> Result<MergedShapes, ShapeError> {
    let first = shapes.first().ok_or(ShapeError::NoOperands)?;
    let rank = first.rank();

    for (operand, shape) in shapes.iter().enumerate().skip(1) {
        if shape.rank() != rank {
            return Err(ShapeError::RankMismatch {
                operand,
                expected: rank,
                got: shape.rank(),
            });
        }
    }
    if partition_axis >= rank {
        return Err(ShapeError::AxisOutOfRange {
            axis: i64::try_from(partition_axis).unwrap_or(i64::MAX),
            rank,
        });
    }
    for shape in shapes {
        shape.num_elements().ok_or(ShapeError::Overflow)?;
    }

    let mut dims: SmallVec<[SmallVec<[u64; 8]>; 4]> =
        shapes.iter().map(|_| SmallVec::new()).collect();
    let mut roles: SmallVec<[AxisRole; 8]> = SmallVec::new();
    let mut run: Option<Run> = None;
    let mut merged_partition = 0;

    let flush = |run: &mut Option<Run>,
                 dims: &mut SmallVec<[SmallVec<[u64; 8]>; 4]>,
                 roles: &mut SmallVec<[AxisRole; 8]>| {
        if let Some(run) = run.take() {
            for d in dims.iter_mut() {
                d.push(run.size);
            }
            roles.push(run.role);
        }
    };

    for axis in 0..rank {
        let sizes: SmallVec<[u64; 4]> = shapes.iter().map(|s| s.dims()[axis]).collect();
        let role = match axis.cmp(&partition_axis) {
            Ordering::Less => AxisRole::Leading,
            Ordering::Equal => AxisRole::Partition,
            Ordering::Greater => AxisRole::Trailing,
        };

        if role == AxisRole::Partition {
            flush(&mut run, &mut dims, &mut roles);
            merged_partition = roles.len();
            for (d, &size) in dims.iter_mut().zip(&sizes) {
                d.push(size);
            }
            roles.push(role);
            continue;
        }

        let max = sizes.iter().copied().max().unwrap_or(1);
        if sizes.iter().all(|&d| d == max) {
            if max == 1 {
                continue;
            }
            run = Some(match run {
                Some(r) => Run {
                    size: r.size * max,
                    role,
                },
                None => Run { size: max, role },
            });
        } else if sizes.iter().all(|&d| d == 1 || d == max) {
            flush(&mut run, &mut dims, &mut roles);
            for (d, &size) in dims.iter_mut().zip(&sizes) {
                d.push(size);
            }
            roles.push(role);
        } else {
            return Err(ShapeError::DimMismatch {
                axis,
                sizes: sizes.to_vec(),
            });
        }
    }
    flush(&mut run, &mut dims, &mut roles);

    let shapes = dims
        .into_iter()
        .map(Shape::new)
        .collect::<Result<SmallVec<[Shape; 4]>, _>>()?;

    Ok(MergedShapes {
        shapes,
        roles,
        partition_axis: merged_partition,
    })
}
