//! # Lanetile Shape Model
//!
//! Canonical description of the operands a tiling plan is computed for.
//!
//! ## Overview
//!
//! Every operand is a [`Shape`] (a list of static dimension sizes, rank at
//! most [`MAX_RANK`]) paired with a [`DType`]. Before partitioning, the
//! operands that co-iterate are passed through [`merge_axes`], which collapses
//! runs of adjacent axes that agree across all operands:
//!
//! ```text
//! data  [4, 4, 8]              data  [16, 8]
//! index [4, 4, 2]   -- merge ->  index [16, 2]
//!        ^  ^  ^                        ^   ^
//!        L  L  P                        L   P
//! ```
//!
//! The merge never touches the partition axis, so the reduced shapes keep
//! the same iteration space with fewer strides to carry.
//!
//! ## Main Types
//!
//! - [`DType`]: Element types and their byte sizes
//! - [`Shape`]: Dimension sizes
//! - [`Strides`]: Element strides per dimension
//! - [`Axis`]: Possibly negative axis attribute
//! - [`MergedShapes`]: Result of an axis merge

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod merge;

pub use merge::{merge_axes, AxisRole, MergedShapes};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum supported operand rank.
pub const MAX_RANK: usize = 8;

/// Element types.
///
/// Each dtype has a fixed byte size. Complex types are representable so that
/// operators can reject them explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Boolean (1 byte).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 16-bit floating point (half precision).
    Float16,
    /// 32-bit floating point (single precision).
    Float32,
    /// 64-bit floating point (double precision).
    Float64,
    /// Brain floating point (bfloat16).
    BFloat16,
    /// Complex number (single precision).
    Complex64,
    /// Complex number (double precision).
    Complex128,
}

impl DType {
    /// All dtypes, in code order.
    pub const ALL: [Self; 15] = [
        Self::Bool,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float16,
        Self::Float32,
        Self::Float64,
        Self::BFloat16,
        Self::Complex64,
        Self::Complex128,
    ];

    /// Returns the size in bytes of this dtype.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Complex64 => 8,
            Self::Complex128 => 16,
        }
    }

    /// Stable numeric code, used in kernel variant keys.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Bool => 0,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 3,
            Self::Int64 => 4,
            Self::UInt8 => 5,
            Self::UInt16 => 6,
            Self::UInt32 => 7,
            Self::UInt64 => 8,
            Self::Float16 => 9,
            Self::Float32 => 10,
            Self::Float64 => 11,
            Self::BFloat16 => 12,
            Self::Complex64 => 13,
            Self::Complex128 => 14,
        }
    }

    /// Inverse of [`DType::code`].
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.code() == code)
    }

    /// Get the short name of this dtype.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::BFloat16 => "bfloat16",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
        }
    }

    /// Returns true if this is a floating-point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float16 | Self::Float32 | Self::Float64 | Self::BFloat16
        )
    }

    /// Returns true if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
        )
    }

    /// Returns true if this is a complex type.
    #[must_use]
    pub const fn is_complex(self) -> bool {
        matches!(self, Self::Complex64 | Self::Complex128)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DType {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dtype = match s {
            "bool" => Self::Bool,
            "int8" | "i8" => Self::Int8,
            "int16" | "i16" => Self::Int16,
            "int32" | "i32" => Self::Int32,
            "int64" | "i64" => Self::Int64,
            "uint8" | "u8" => Self::UInt8,
            "uint16" | "u16" => Self::UInt16,
            "uint32" | "u32" => Self::UInt32,
            "uint64" | "u64" => Self::UInt64,
            "float16" | "f16" | "half" => Self::Float16,
            "float32" | "f32" | "float" => Self::Float32,
            "float64" | "f64" | "double" => Self::Float64,
            "bfloat16" | "bf16" => Self::BFloat16,
            "complex64" | "c64" => Self::Complex64,
            "complex128" | "c128" => Self::Complex128,
            _ => return Err(ShapeError::UnknownDType(s.to_string())),
        };
        Ok(dtype)
    }
}

/// Operand shape: an ordered list of dimension sizes.
///
/// Rank is limited to [`MAX_RANK`]. Zero-sized dimensions are representable;
/// rejecting them is left to the planner so it can report an empty workload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct Shape(SmallVec<[u64; 4]>);

impl Shape {
    /// Creates a shape from dimension sizes.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::RankTooLarge`] if there are more than
    /// [`MAX_RANK`] dimensions.
    pub fn new(dims: impl IntoIterator<Item = u64>) -> Result<Self, ShapeError> {
        let dims: SmallVec<[u64; 4]> = dims.into_iter().collect();
        if dims.len() > MAX_RANK {
            return Err(ShapeError::RankTooLarge { rank: dims.len() });
        }
        Ok(Self(dims))
    }

    /// Creates a scalar shape (rank 0).
    #[must_use]
    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    /// Creates a rank-1 shape.
    #[must_use]
    pub fn vector(len: u64) -> Self {
        Self(SmallVec::from_slice(&[len]))
    }

    /// Returns the rank (number of dimensions).
    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Returns the dimensions.
    #[must_use]
    pub fn dims(&self) -> &[u64] {
        &self.0
    }

    /// Returns the total number of elements, or `None` on overflow.
    #[must_use]
    pub fn num_elements(&self) -> Option<u64> {
        self.0.iter().try_fold(1u64, |acc, &n| acc.checked_mul(n))
    }

    /// Returns true if this is a scalar (rank 0).
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the first zero-sized axis, if any.
    #[must_use]
    pub fn zero_axis(&self) -> Option<usize> {
        self.0.iter().position(|&n| n == 0)
    }
}

impl TryFrom<Vec<u64>> for Shape {
    type Error = ShapeError;

    fn try_from(dims: Vec<u64>) -> Result<Self, Self::Error> {
        Self::new(dims)
    }
}

impl From<Shape> for Vec<u64> {
    fn from(shape: Shape) -> Self {
        shape.0.into_vec()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl FromStr for Shape {
    type Err = ShapeError;

    /// Parses `4x4x8`, `4,4,8` or `[4, 4, 8]`. An empty string or `[]` is a
    /// scalar.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
        if inner.trim().is_empty() {
            return Ok(Self::scalar());
        }
        let dims = inner
            .split(|c: char| c == 'x' || c == ',')
            .map(|d| {
                d.trim()
                    .parse::<u64>()
                    .map_err(|_| ShapeError::Parse(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(dims)
    }
}

/// Element strides for each dimension.
///
/// A stride of zero marks a broadcast axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Strides(SmallVec<[i64; 4]>);

impl Strides {
    /// Creates new strides.
    #[must_use]
    pub fn new(strides: impl IntoIterator<Item = i64>) -> Self {
        Self(strides.into_iter().collect())
    }

    /// Returns the stride values.
    #[must_use]
    pub fn values(&self) -> &[i64] {
        &self.0
    }
}

/// An axis attribute, possibly negative (counted from the end).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axis(pub i64);

impl Axis {
    /// Creates a new axis.
    #[must_use]
    pub const fn new(axis: i64) -> Self {
        Self(axis)
    }

    /// The innermost axis.
    #[must_use]
    pub const fn last() -> Self {
        Self(-1)
    }

    /// Normalizes a potentially negative axis to a positive index.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::AxisOutOfRange`] if the axis does not exist.
    pub fn normalize(self, rank: usize) -> Result<usize, ShapeError> {
        let signed_rank = i64::try_from(rank).unwrap_or(i64::MAX);
        let axis = if self.0 < 0 { signed_rank + self.0 } else { self.0 };
        if (0..signed_rank).contains(&axis) {
            usize::try_from(axis).map_err(|_| ShapeError::AxisOutOfRange { axis: self.0, rank })
        } else {
            Err(ShapeError::AxisOutOfRange { axis: self.0, rank })
        }
    }
}

/// Errors from shape construction and axis merging.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// Too many dimensions.
    #[error("rank {rank} exceeds the maximum of {MAX_RANK}")]
    RankTooLarge {
        /// The offending rank.
        rank: usize,
    },

    /// Operands of different rank were asked to co-iterate.
    #[error("operand {operand} has rank {got}, expected {expected}")]
    RankMismatch {
        /// Index of the offending operand.
        operand: usize,
        /// Rank of the first operand.
        expected: usize,
        /// Rank of the offending operand.
        got: usize,
    },

    /// Axis sizes disagree outside the partition axis and the broadcast case.
    #[error("axis {axis} sizes {sizes:?} are neither equal nor broadcastable")]
    DimMismatch {
        /// The axis that disagrees.
        axis: usize,
        /// Size of that axis in each operand.
        sizes: Vec<u64>,
    },

    /// Axis attribute outside the operand rank.
    #[error("invalid axis {axis} for rank {rank}")]
    AxisOutOfRange {
        /// The axis specified.
        axis: i64,
        /// The operand rank.
        rank: usize,
    },

    /// Merge called with no operands.
    #[error("axis merge needs at least one operand")]
    NoOperands,

    /// Dimension product overflowed.
    #[error("shape element count overflows u64")]
    Overflow,

    /// Unparseable shape string.
    #[error("cannot parse shape `{0}`")]
    Parse(String),

    /// Unknown dtype name.
    #[error("unknown dtype `{0}`")]
    UnknownDType(String),
}
