//! # Operator Registry
//!
//! Each operator contributes a [`TilingStrategy`]: a small, pure reduction
//! from its operands and attributes to a [`Workload`] the generic
//! [`Planner`](crate::Planner) knows how to split.
//!
//! Operators are looked up in an explicit [`TilingRegistry`] value owned by
//! the caller. Nothing registers itself at load time.
//!
//! ```text
//! TilingRegistry
//!   "elementwise"      -> Elementwise
//!   "gather_elements"  -> GatherElements
//!   "scatter_elements" -> ScatterElements
//!   "window_reduce"    -> WindowReduce
//! ```

use crate::{ops, TilingError, TilingResult};
use lanetile_shape::{Axis, DType, MergedShapes, Shape};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// One operand of an operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Operand name, used in error messages.
    pub name: String,
    /// Static shape.
    pub shape: Shape,
    /// Element type.
    pub dtype: DType,
}

impl Operand {
    /// Create a new operand.
    #[must_use]
    pub fn new(name: impl Into<String>, shape: Shape, dtype: DType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }
}

/// How scattered updates combine with the existing value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceMode {
    /// Overwrite.
    #[default]
    None,
    /// Accumulate.
    Add,
}

impl ReduceMode {
    /// Get the name of this mode.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Add => "add",
        }
    }
}

impl fmt::Display for ReduceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ReduceMode {
    type Err = TilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "add" => Ok(Self::Add),
            other => Err(TilingError::InvalidAttribute {
                name: "reduce",
                reason: format!("expected `none` or `add`, got `{other}`"),
            }),
        }
    }
}

/// Operator attributes that influence partitioning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpAttrs {
    /// Gather/scatter axis.
    pub axis: Option<Axis>,
    /// Reduction window length.
    pub window: Option<u64>,
    /// Reduction window stride.
    pub stride: Option<u64>,
    /// Scatter combine mode.
    pub reduce: ReduceMode,
}

/// Operands and attributes of one planning call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingInput {
    /// Operands in operator order.
    pub operands: Vec<Operand>,
    /// Operator attributes.
    #[serde(default)]
    pub attrs: OpAttrs,
}

impl TilingInput {
    /// Create an input with default attributes.
    #[must_use]
    pub fn new(operands: Vec<Operand>) -> Self {
        Self {
            operands,
            attrs: OpAttrs::default(),
        }
    }

    /// Replace the attributes.
    #[must_use]
    pub fn with_attrs(mut self, attrs: OpAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    /// Byte size of every operand's elements.
    #[must_use]
    pub fn elem_sizes(&self) -> SmallVec<[usize; 4]> {
        self.operands.iter().map(|o| o.dtype.size_bytes()).collect()
    }
}

/// An operator reduced to rows of contiguous work.
///
/// Rows are independent units a lane may own whole. When there are fewer
/// rows than lanes and `split_rows` is set, a row may also be shared by a
/// group of lanes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    /// Operand shapes after axis merging.
    pub merged: MergedShapes,
    /// Independent rows.
    pub rows: u64,
    /// Iterated elements per row.
    pub row_len: u64,
    /// Output elements per row.
    pub out_row_len: u64,
    /// Elements per row that must be staged whole, even when the row is
    /// split across lanes. Zero when rows stream.
    pub resident_len: u64,
    /// Element size of every staged operand.
    pub elem_sizes: SmallVec<[usize; 4]>,
    /// Largest operand row length divided by the smallest.
    pub row_ratio: u64,
    /// Primary element type, used for kernel dispatch.
    pub dtype: DType,
    /// Output elements receive contributions from several row positions.
    pub accumulates: bool,
    /// A row may be split across lanes.
    pub split_rows: bool,
}

/// The tiling routine of one operator.
pub trait TilingStrategy: Send + Sync {
    /// Operator name.
    fn name(&self) -> &'static str;

    /// Operand names, in order.
    fn operands(&self) -> &'static [&'static str];

    /// Validate operands and attributes and reduce them to a [`Workload`].
    ///
    /// # Errors
    ///
    /// Returns an error if operand count, shapes, dtypes or attributes are
    /// invalid for the operator.
    fn describe(&self, input: &TilingInput) -> TilingResult<Workload>;
}

/// Operator name to [`TilingStrategy`] table.
#[derive(Default)]
pub struct TilingRegistry {
    strategies: FxHashMap<&'static str, Box<dyn TilingStrategy>>,
}

impl TilingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in operator.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for strategy in ops::builtin() {
            registry.register_boxed(strategy);
        }
        registry
    }

    /// Register a strategy, returning the one it replaces.
    pub fn register(
        &mut self,
        strategy: impl TilingStrategy + 'static,
    ) -> Option<Box<dyn TilingStrategy>> {
        self.register_boxed(Box::new(strategy))
    }

    /// Register a boxed strategy, returning the one it replaces.
    pub fn register_boxed(
        &mut self,
        strategy: Box<dyn TilingStrategy>,
    ) -> Option<Box<dyn TilingStrategy>> {
        self.strategies.insert(strategy.name(), strategy)
    }

    /// Look up an operator.
    ///
    /// # Errors
    ///
    /// Returns [`TilingError::UnknownOperator`] if nothing is registered
    /// under `name`.
    pub fn get(&self, name: &str) -> TilingResult<&dyn TilingStrategy> {
        self.strategies
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| TilingError::UnknownOperator(name.to_string()))
    }

    /// Registered operator names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered operators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for TilingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TilingRegistry")
            .field("operators", &self.names())
            .finish()
    }
}
