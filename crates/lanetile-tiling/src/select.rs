//! # Strategy Selection
//!
//! Picks the execution strategy for a planned workload and encodes the
//! kernel variant key the launcher dispatches on.
//!
//! ## Decision Table
//!
//! First match wins:
//!
//! | Condition | Strategy |
//! |-----------|----------|
//! | scalar fallback required | [`StrategyKey::Scalar`] |
//! | transposed layout, full row fits, transpose tile fits | [`StrategyKey::VectorizedTransposed`] |
//! | full row fits | [`StrategyKey::Vectorized`] |
//! | otherwise | [`StrategyKey::Sliced`] |
//!
//! Strategy codes double as tiers: a lower code is never richer, so
//! shrinking scratch capacity can only lower the code.

use crate::BufferPlan;
use lanetile_shape::{DType, MergedShapes};
use lanetile_target::PlatformLimits;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution strategy of a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyKey {
    /// Element-at-a-time processing.
    Scalar = 0,
    /// Vector processing of column slices of a row.
    Sliced = 1,
    /// Vector processing of whole, batched rows.
    Vectorized = 2,
    /// Batched rows reorganized so the partition axis is contiguous.
    VectorizedTransposed = 3,
}

impl StrategyKey {
    /// All strategies, poorest first.
    pub const ALL: [Self; 4] = [
        Self::Scalar,
        Self::Sliced,
        Self::Vectorized,
        Self::VectorizedTransposed,
    ];

    /// Stable numeric code. Higher codes are richer tiers.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Inverse of [`StrategyKey::code`].
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Get the name of this strategy.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Sliced => "sliced",
            Self::Vectorized => "vectorized",
            Self::VectorizedTransposed => "vectorized-transposed",
        }
    }
}

impl fmt::Display for StrategyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Choose the strategy for a buffer plan.
///
/// The transposed variant needs a square tile of one alignment block per
/// side, so at least `block_elems` rows must fit per slot.
#[must_use]
pub fn select_strategy(
    shapes: &MergedShapes,
    elem_sizes: &[usize],
    limits: &PlatformLimits,
    plan: &BufferPlan,
) -> StrategyKey {
    if plan.needs_scalar_fallback {
        return StrategyKey::Scalar;
    }
    let min_elem = elem_sizes.iter().copied().min().unwrap_or(1);
    let transpose_tile_fits = plan.rows_per_slot >= limits.block_elems(min_elem);
    if shapes.needs_transpose() && plan.fits_full_row && transpose_tile_fits {
        StrategyKey::VectorizedTransposed
    } else if plan.fits_full_row {
        StrategyKey::Vectorized
    } else {
        StrategyKey::Sliced
    }
}

/// A compiled kernel variant, identified by a stable decimal key.
///
/// The key is `strategy * 1000 + dtype * 10 + flags`, where `flags` has bit 0
/// for atomic accumulation and bit 1 for double buffering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelVariant {
    /// Execution strategy.
    pub strategy: StrategyKey,
    /// Primary element type.
    pub dtype: DType,
    /// Output is written with atomic accumulation.
    pub atomic_add: bool,
    /// Slots are double-buffered.
    pub double_buffered: bool,
}

impl KernelVariant {
    const ATOMIC_BIT: u32 = 0b01;
    const DOUBLE_BUFFER_BIT: u32 = 0b10;

    /// Encode the variant key.
    #[must_use]
    pub const fn key(&self) -> u32 {
        let mut flags = 0;
        if self.atomic_add {
            flags |= Self::ATOMIC_BIT;
        }
        if self.double_buffered {
            flags |= Self::DOUBLE_BUFFER_BIT;
        }
        self.strategy.code() * 1000 + self.dtype.code() * 10 + flags
    }

    /// Decode a variant key.
    #[must_use]
    pub fn from_key(key: u32) -> Option<Self> {
        let flags = key % 10;
        if flags > (Self::ATOMIC_BIT | Self::DOUBLE_BUFFER_BIT) {
            return None;
        }
        Some(Self {
            strategy: StrategyKey::from_code(key / 1000)?,
            dtype: DType::from_code((key % 1000) / 10)?,
            atomic_add: flags & Self::ATOMIC_BIT != 0,
            double_buffered: flags & Self::DOUBLE_BUFFER_BIT != 0,
        })
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.strategy, self.dtype)?;
        if self.atomic_add {
            write!(f, "+atomic")?;
        }
        if self.double_buffered {
            write!(f, "+db")?;
        }
        Ok(())
    }
}
