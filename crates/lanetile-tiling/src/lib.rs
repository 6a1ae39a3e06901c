//! # Lanetile Tiling Engine
//!
//! Host-side planning of how an operator's index space is split across a
//! fixed number of parallel compute lanes, each owning a small scratch
//! memory, and which kernel variant should execute the result.
//!
//! ## Overview
//!
//! Planning is a pure, synchronous computation. Given operand shapes, dtypes,
//! operator attributes and [`PlatformLimits`], the engine produces a
//! [`TilingRecord`]: a fixed-layout record consumed read-only by the launcher
//! and by the kernel.
//!
//! ## Pipeline
//!
//! ```text
//! operands + attrs
//!     |
//!     v
//! [TilingStrategy]   <- per-operator: merge axes, reduce to a Workload
//!     |
//!     v
//! [partition]        <- former/tail lane split, nested when rows < lanes
//!     |
//!     v
//! [BufferPlanner]    <- batched rows -> sliced row -> scalar fallback
//!     |
//!     v
//! [select_strategy]  <- Vectorized / VectorizedTransposed / Sliced / Scalar
//!     |
//!     v
//! [TailResolver]     <- last chunk of every split axis, atomic-add check
//!     |
//!     v
//! [TilingRecord]     <- launch lanes, workspace bytes, serialized plan
//! ```
//!
//! ## Main Types
//!
//! - [`Planner`]: The generic driver running the pipeline
//! - [`TilingRegistry`]: Explicit operator name to [`TilingStrategy`] table
//! - [`PartitionPlan`] / [`NestedPartition`]: Lane splits
//! - [`BufferPlan`]: Scratch slot feasibility
//! - [`StrategyKey`] / [`KernelVariant`]: Kernel selection
//! - [`TilingRecord`]: The serialized output

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod ops;
pub mod partition;
pub mod planner;
pub mod record;
pub mod registry;
pub mod select;
pub mod tail;

pub use buffer::{BufferPlan, BufferPlanner, BufferRequest};
pub use lanetile_target::PlatformLimits;
pub use partition::{partition, partition_nested, LaneSplit, NestedPartition, PartitionPlan};
pub use planner::{Plan, Planner, PlannerOptions};
pub use record::{RecordError, RecordFlags, TilingRecord};
pub use registry::{
    OpAttrs, Operand, ReduceMode, TilingInput, TilingRegistry, TilingStrategy, Workload,
};
pub use select::{select_strategy, KernelVariant, StrategyKey};
pub use tail::{AxisTail, TailResolver};

use lanetile_shape::{DType, ShapeError};
use lanetile_target::TargetError;
use thiserror::Error;

/// Errors that can occur while computing a tiling plan.
///
/// Every failure is terminal: planning never retries and never returns a
/// partially filled record.
#[derive(Debug, Error)]
pub enum TilingError {
    /// Operand shapes cannot co-iterate.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(#[from] ShapeError),

    /// There is no work to partition.
    #[error("empty workload: {reason}")]
    EmptyWorkload {
        /// Why the workload is empty.
        reason: String,
    },

    /// No lanes to partition over.
    #[error("insufficient lanes: {lanes} available")]
    InsufficientLanes {
        /// Lanes available.
        lanes: u32,
    },

    /// Not even the scalar tier fits in scratch memory.
    #[error("insufficient scratch: {required} bytes required, {available} available")]
    InsufficientScratch {
        /// Minimum bytes the cheapest tier needs.
        required: u64,
        /// Bytes available per lane after reservations.
        available: u64,
    },

    /// Element type not supported by this operator.
    #[error("unsupported dtype {dtype} for operand `{operand}`")]
    UnsupportedDType {
        /// Operand name.
        operand: String,
        /// The rejected dtype.
        dtype: DType,
    },

    /// Zero-byte element size given directly to the buffer planner.
    #[error("operand element size must be non-zero")]
    ZeroElementSize,

    /// Wrong number of operands for the operator.
    #[error("operator `{operator}` expects {expected} operands, got {got}")]
    OperandCount {
        /// Operator name.
        operator: &'static str,
        /// Expected count description.
        expected: String,
        /// Actual count.
        got: usize,
    },

    /// Missing or invalid operator attribute.
    #[error("invalid attribute `{name}`: {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// No strategy registered under this name.
    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    /// Error from platform limits.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Error from record encoding.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Result type for tiling operations.
pub type TilingResult<T> = Result<T, TilingError>;

/// Ceiling division. `d` must be non-zero.
#[must_use]
pub const fn ceil_div(n: u64, d: u64) -> u64 {
    n / d + if n % d == 0 { 0 } else { 1 }
}

/// Round `n` up to a multiple of `align`, or `None` on overflow.
#[must_use]
pub const fn align_up(n: u64, align: u64) -> Option<u64> {
    match n.checked_add(align - 1) {
        Some(v) => Some(v / align * align),
        None => None,
    }
}

/// Round `n` down to a multiple of `align`.
#[must_use]
pub const fn align_down(n: u64, align: u64) -> u64 {
    n / align * align
}
