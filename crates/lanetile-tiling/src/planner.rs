//! # Planner
//!
//! The generic driver: runs one [`TilingStrategy`] through the shared
//! partition, buffer, strategy and tail stages and flattens the result into a
//! [`TilingRecord`].
//!
//! ## Row Splitting
//!
//! When an operator has fewer rows than there are lanes, rows are cut into
//! alignment blocks and each row gets a group of lanes ([`LaneSplit::Nested`]).
//! Otherwise every lane owns whole rows ([`LaneSplit::Rows`]).
//!
//! ## Atomic Accumulation
//!
//! The plan requires atomic accumulation when either
//!
//! - an accumulating operator has a row shared by several lanes, or
//! - a lane's contiguous output is shorter than one alignment block, so two
//!   lanes write into the same block, or
//! - an accumulating operator is sliced and its last slice is a partial
//!   alignment block.

use crate::buffer::{BufferPlanner, BufferRequest};
use crate::record::{scratch_workspace_bytes, RecordFlags, TilingRecord};
use crate::{
    ceil_div, partition, partition_nested, select_strategy, AxisTail, BufferPlan, KernelVariant,
    LaneSplit, StrategyKey, TailResolver, TilingError, TilingInput, TilingRegistry, TilingResult,
    TilingStrategy,
};
use lanetile_target::PlatformLimits;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument};

/// Tunables of the planning pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerOptions {
    /// Double-buffer scratch slots.
    pub double_buffer: bool,
    /// Slice-count ceiling above which the scalar tier is forced.
    pub max_slices: u64,
    /// Operand row-length ratio above which the scalar tier is forced.
    pub max_row_ratio: u64,
    /// Scratch bytes per lane held back for kernel scalars.
    pub reserved_scratch_bytes: u64,
    /// Fixed per-launch synchronization workspace, in bytes.
    pub sync_workspace_bytes: u64,
    /// Reject plans that need atomic accumulation.
    pub deterministic: bool,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            double_buffer: true,
            max_slices: 4096,
            max_row_ratio: 1024,
            reserved_scratch_bytes: 1024,
            sync_workspace_bytes: 16 * 1024 * 1024,
            deterministic: false,
        }
    }
}

/// A computed tiling plan.
///
/// `record` is the flattened form consumed by the launcher and the kernel;
/// the other fields keep the structured intermediate results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Operator name.
    pub operator: &'static str,
    /// Lane split.
    pub split: LaneSplit,
    /// Scratch slot layout.
    pub buffer: BufferPlan,
    /// Chosen execution strategy.
    pub strategy: StrategyKey,
    /// Kernel variant to launch.
    pub variant: KernelVariant,
    /// Row batches of a former lane.
    pub former_loops: AxisTail,
    /// Row batches of a tail lane.
    pub tail_loops: AxisTail,
    /// Column slices of one lane row.
    pub slices: AxisTail,
    /// Output must be accumulated atomically.
    pub atomic_add_required: bool,
    /// Serialized plan.
    pub record: TilingRecord,
}

impl Plan {
    /// Lanes the launcher must start.
    #[must_use]
    pub const fn launch_lane_count(&self) -> u32 {
        self.record.launch_lane_count
    }

    /// Global workspace the caller must allocate, in bytes.
    #[must_use]
    pub const fn scratch_workspace_bytes(&self) -> u64 {
        self.record.scratch_workspace_bytes
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!("Tiling Plan: {}", self.operator);
        writeln!(f, "{title}")?;
        writeln!(f, "{}", "=".repeat(title.len()))?;
        writeln!(f, "Strategy:   {}", self.strategy)?;
        writeln!(f, "Variant:    {} (key {})", self.variant, self.variant.key())?;
        writeln!(f, "Lanes:      {}", self.launch_lane_count())?;
        match &self.split {
            LaneSplit::Rows(rows) => writeln!(f, "Rows:       {rows}")?,
            LaneSplit::Nested(nested) => {
                writeln!(
                    f,
                    "Groups:     {} rows over {}",
                    nested.core_group_num(),
                    nested.groups()
                )?;
                writeln!(f, "  former:   {}", nested.former_group())?;
                writeln!(f, "  tail:     {}", nested.tail_group())?;
            }
        }
        writeln!(f, "Buffer:     {}", self.buffer)?;
        writeln!(
            f,
            "Loops:      former {} x {} (last {}), tail {} x {} (last {})",
            self.former_loops.count,
            self.former_loops.chunk,
            self.former_loops.tail,
            self.tail_loops.count,
            self.tail_loops.chunk,
            self.tail_loops.tail
        )?;
        writeln!(
            f,
            "Slices:     {} x {} (last {}, padded {})",
            self.slices.count, self.slices.chunk, self.slices.tail, self.slices.tail_aligned
        )?;
        writeln!(
            f,
            "Atomic add: {}",
            if self.atomic_add_required { "yes" } else { "no" }
        )?;
        writeln!(f, "Workspace:  {} bytes", self.scratch_workspace_bytes())
    }
}

/// Runs tiling strategies against one platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Planner {
    limits: PlatformLimits,
    options: PlannerOptions,
}

impl Planner {
    /// Create a planner.
    #[must_use]
    pub const fn new(limits: PlatformLimits, options: PlannerOptions) -> Self {
        Self { limits, options }
    }

    /// Target limits.
    #[must_use]
    pub const fn limits(&self) -> &PlatformLimits {
        &self.limits
    }

    /// Pipeline options.
    #[must_use]
    pub const fn options(&self) -> &PlannerOptions {
        &self.options
    }

    /// Look up `operator` in `registry` and plan it.
    ///
    /// # Errors
    ///
    /// Returns [`TilingError::UnknownOperator`] if the operator is not
    /// registered, or any error of [`Planner::plan`].
    pub fn plan_op(
        &self,
        registry: &TilingRegistry,
        operator: &str,
        input: &TilingInput,
    ) -> TilingResult<Plan> {
        self.plan(registry.get(operator)?, input)
    }

    /// Plan one operator invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand has a zero-sized axis, the strategy
    /// rejects the input, or not even the scalar tier fits in scratch.
    #[instrument(skip(self, strategy, input), fields(op = strategy.name()))]
    pub fn plan(&self, strategy: &dyn TilingStrategy, input: &TilingInput) -> TilingResult<Plan> {
        for operand in &input.operands {
            if let Some(axis) = operand.shape.zero_axis() {
                return Err(TilingError::EmptyWorkload {
                    reason: format!("operand `{}` has a zero-sized axis {axis}", operand.name),
                });
            }
        }

        let workload = strategy.describe(input)?;
        if workload.rows == 0 || workload.row_len == 0 {
            return Err(TilingError::EmptyWorkload {
                reason: format!("{} rows of {} elements", workload.rows, workload.row_len),
            });
        }
        let min_elem = workload
            .elem_sizes
            .iter()
            .copied()
            .min()
            .ok_or_else(|| TilingError::EmptyWorkload {
                reason: "no operands to stage".to_string(),
            })?;
        let block = self.limits.block_elems(min_elem);
        let lanes = self.limits.lane_count();

        // Partition
        let nested = if workload.split_rows && workload.row_len > block {
            partition_nested(workload.rows, ceil_div(workload.row_len, block), lanes)?
        } else {
            None
        };
        let (split, lane_row_len) = match nested {
            Some(nested) => {
                let lane_row = nested
                    .max_chunk()
                    .saturating_mul(block)
                    .min(workload.row_len);
                (LaneSplit::Nested(nested), lane_row)
            }
            None => (
                LaneSplit::Rows(partition(workload.rows, lanes)?),
                workload.row_len,
            ),
        };
        debug!(
            rows = workload.rows,
            row_len = workload.row_len,
            used_lanes = split.used_lanes(),
            nested = matches!(split, LaneSplit::Nested(_)),
            lane_row_len,
            "partition"
        );

        // Buffer
        let available = self
            .limits
            .scratch_bytes_per_lane()
            .saturating_sub(self.options.reserved_scratch_bytes);
        let slots = if self.options.double_buffer { 2 } else { 1 };
        let scalar_floor = u64::from(self.limits.alignment_bytes())
            .saturating_mul(workload.elem_sizes.len() as u64)
            .saturating_mul(slots);
        if available < scalar_floor {
            return Err(TilingError::InsufficientScratch {
                required: scalar_floor,
                available,
            });
        }
        let request = BufferRequest::new(
            &workload.elem_sizes,
            lane_row_len.max(workload.resident_len),
            available,
            self.limits.alignment_bytes(),
            self.options.double_buffer,
        )
        .with_row_ratio(workload.row_ratio);
        let buffer = BufferPlanner::new(self.options.max_slices, self.options.max_row_ratio)
            .plan(&request)?;
        debug!(
            elements_per_slot = buffer.elements_per_slot,
            rows_per_slot = buffer.rows_per_slot,
            slice_count = buffer.slice_count,
            "buffer"
        );
        if buffer.needs_scalar_fallback {
            debug!(row_ratio = workload.row_ratio, "scalar fallback");
        } else if buffer.needs_slicing {
            debug!(row_size = request.row_size, "row does not fit, slicing");
        }

        // Strategy
        let key = select_strategy(&workload.merged, &workload.elem_sizes, &self.limits, &buffer);
        debug!(strategy = %key, "strategy");

        // Tails
        let batch = match split {
            LaneSplit::Rows(_) if buffer.fits_full_row => buffer.rows_per_slot.max(1),
            _ => 1,
        };
        let (former_rows, tail_rows) = match &split {
            LaneSplit::Rows(rows) => (
                rows.former_chunk(),
                if rows.has_tail() { rows.tail_chunk() } else { 0 },
            ),
            LaneSplit::Nested(nested) => (1, u64::from(nested.groups().has_tail())),
        };
        let row_batches = TailResolver::new(1);
        let former_loops = row_batches.resolve(former_rows, batch);
        let tail_loops = row_batches.resolve(tail_rows, batch);

        let resolver = TailResolver::new(buffer.block_elems);
        let slice_len = match key {
            StrategyKey::Scalar => buffer.block_elems,
            StrategyKey::Sliced => buffer.elements_per_slot,
            StrategyKey::Vectorized | StrategyKey::VectorizedTransposed => lane_row_len,
        };
        let slices = resolver.resolve(lane_row_len, slice_len);

        let shared_block = match &split {
            LaneSplit::Rows(rows) => {
                rows.used_lanes() > 1
                    && (resolver.splits_block(rows.former_chunk().saturating_mul(workload.out_row_len))
                        || (rows.has_tail()
                            && resolver.splits_block(
                                rows.tail_chunk().saturating_mul(workload.out_row_len),
                            )))
            }
            LaneSplit::Nested(_) => false,
        };
        // a partial last slice of a reduction window is flushed on its own
        let split_window = workload.accumulates
            && key == StrategyKey::Sliced
            && resolver.splits_block(slices.tail);
        let atomic_add_required =
            (workload.accumulates && split.splits_rows()) || shared_block || split_window;
        debug!(
            former_loops = former_loops.count,
            tail_loops = tail_loops.count,
            slices = slices.count,
            slice_tail = slices.tail,
            atomic_add_required,
            "tail"
        );
        if atomic_add_required && self.options.deterministic {
            return Err(TilingError::InvalidAttribute {
                name: "deterministic",
                reason: format!(
                    "`{}` needs atomic accumulation for these shapes",
                    strategy.name()
                ),
            });
        }

        // Record
        let variant = KernelVariant {
            strategy: key,
            dtype: workload.dtype,
            atomic_add: atomic_add_required,
            double_buffered: buffer.double_buffered,
        };
        let workspace = scratch_workspace_bytes(
            &buffer,
            &workload.elem_sizes,
            self.limits.alignment_bytes(),
            self.options.sync_workspace_bytes,
        );

        let mut flags = RecordFlags::from_buffer(&buffer);
        flags.set(RecordFlags::ATOMIC_ADD, atomic_add_required);
        flags.set(RecordFlags::TRANSPOSED, key == StrategyKey::VectorizedTransposed);
        flags.set(RecordFlags::NESTED, matches!(split, LaneSplit::Nested(_)));

        let mut record = TilingRecord {
            strategy_key: key.code(),
            variant_key: variant.key(),
            flags: flags.bits(),
            launch_lane_count: split.used_lanes(),
            dtype_code: workload.dtype.code(),
            rows: workload.rows,
            row_len: workload.row_len,
            out_row_len: workload.out_row_len,
            resident_len: workload.resident_len,
            elements_per_slot: buffer.elements_per_slot,
            rows_per_slot: buffer.rows_per_slot,
            row_aligned_len: buffer.row_aligned_len,
            rows_per_loop: batch,
            former_loops: former_loops.count,
            former_tail_rows: former_loops.tail,
            tail_loops: tail_loops.count,
            tail_tail_rows: tail_loops.tail,
            slice_count: slices.count,
            slice_len: slices.chunk,
            slice_tail: slices.tail,
            slice_tail_aligned: slices.tail_aligned,
            scratch_workspace_bytes: workspace,
            ..TilingRecord::default()
        };
        match &split {
            LaneSplit::Rows(rows) => {
                record.former_count = u64::from(rows.former_count());
                record.former_chunk = rows.former_chunk();
                record.tail_count = u64::from(rows.tail_count());
                record.tail_chunk = rows.tail_chunk();
            }
            LaneSplit::Nested(nested) => {
                // one row per lane group
                record.former_count = u64::from(nested.core_group_num());
                record.former_chunk = 1;
                record.tail_chunk = 1;
                record.core_group_num = u64::from(nested.core_group_num());
                record.group_former_count = u64::from(nested.groups().former_count());
                record.group_former_lanes = nested.groups().former_chunk();
                record.group_tail_lanes = nested.groups().tail_chunk();
                record.inner_unit = block;
                record.inner_ff_count = u64::from(nested.former_group().former_count());
                record.inner_ff_chunk = nested.former_group().former_chunk();
                record.inner_ft_chunk = nested.former_group().tail_chunk();
                record.inner_tf_count = u64::from(nested.tail_group().former_count());
                record.inner_tf_chunk = nested.tail_group().former_chunk();
                record.inner_tt_chunk = nested.tail_group().tail_chunk();
                record.row_pad =
                    ceil_div(workload.row_len, block).saturating_mul(block) - workload.row_len;
            }
        }
        record.set_shapes(&workload.merged)?;
        debug!(
            strategy_key = record.strategy_key,
            variant_key = record.variant_key,
            launch_lane_count = record.launch_lane_count,
            scratch_workspace_bytes = record.scratch_workspace_bytes,
            "record"
        );

        Ok(Plan {
            operator: strategy.name(),
            split,
            buffer,
            strategy: key,
            variant,
            former_loops,
            tail_loops,
            slices,
            atomic_add_required,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OpAttrs, Operand, ReduceMode};
    use lanetile_shape::{Axis, DType, Shape};
    use lanetile_target::Preset;

    fn planner() -> Planner {
        Planner::new(Preset::Vector48.limits(), PlannerOptions::default())
    }

    fn operand(name: &str, dims: &[u64], dtype: DType) -> Operand {
        Operand::new(name, Shape::new(dims.iter().copied()).unwrap(), dtype)
    }

    fn gather(data: &[u64], index: &[u64], axis: i64) -> TilingInput {
        TilingInput::new(vec![
            operand("data", data, DType::Float32),
            operand("index", index, DType::Int64),
        ])
        .with_attrs(OpAttrs {
            axis: Some(Axis::new(axis)),
            ..OpAttrs::default()
        })
    }

    #[test]
    fn test_elementwise_row_split_across_all_lanes() {
        let registry = TilingRegistry::with_builtin();
        let input = TilingInput::new(vec![
            operand("x", &[100_000], DType::Float32),
            operand("y", &[100_000], DType::Float32),
        ]);
        let plan = planner().plan_op(&registry, "elementwise", &input).unwrap();

        assert_eq!(plan.launch_lane_count(), 48);
        assert_eq!(plan.strategy, StrategyKey::Vectorized);
        assert!(plan.record.flags().contains(RecordFlags::NESTED));
        assert!(!plan.atomic_add_required);

        // 12500 blocks of 8 elements over 48 lanes
        let r = &plan.record;
        assert_eq!(r.core_group_num, 1);
        assert_eq!(r.inner_unit, 8);
        assert_eq!(r.inner_ff_count, 20);
        assert_eq!(r.inner_ff_chunk, 261);
        assert_eq!(r.inner_ft_chunk, 260);
        assert_eq!(r.row_pad, 0);
        assert_eq!(r.slice_count, 1);
        assert_eq!(r.slice_len, 261 * 8);
    }

    #[test]
    fn test_gather_lopsided_rows_fall_back_to_scalar() {
        let input = gather(&[7, 65_536, 4096], &[7, 2, 4096], 1);
        let plan = planner().plan(&crate::ops::GatherElements, &input).unwrap();

        assert_eq!(plan.strategy, StrategyKey::Scalar);
        assert!(plan.buffer.needs_scalar_fallback);
        let LaneSplit::Rows(rows) = plan.split else {
            panic!("expected a row split");
        };
        assert_eq!(rows.former_count(), 16);
        assert_eq!(rows.former_chunk(), 598);
        assert_eq!(rows.tail_count(), 32);
        assert_eq!(rows.tail_chunk(), 597);
        // sized for the 8144-element staged slot the kernel may still take
        assert_eq!(plan.buffer.elements_per_slot, 8144);
        assert_eq!(
            plan.scratch_workspace_bytes(),
            8144 * 8 * 2 * 2 + 16 * 1024 * 1024
        );
    }

    #[test]
    fn test_gather_slices_when_ratio_allowed() {
        let options = PlannerOptions {
            max_row_ratio: 65_536,
            ..PlannerOptions::default()
        };
        let plan = Planner::new(Preset::Vector48.limits(), options)
            .plan(
                &crate::ops::GatherElements,
                &gather(&[7, 65_536, 4096], &[7, 2, 4096], 1),
            )
            .unwrap();
        assert_eq!(plan.strategy, StrategyKey::Sliced);
        // (196608 - 1024) / (12 * 2) = 8149, aligned down to 8
        assert_eq!(plan.buffer.elements_per_slot, 8144);
        assert_eq!(plan.buffer.slice_count, 9);
    }

    #[test]
    fn test_narrow_rows_share_blocks() {
        let plan = planner()
            .plan(&crate::ops::GatherElements, &gather(&[4, 4, 8], &[4, 4, 2], -1))
            .unwrap();
        assert_eq!(plan.launch_lane_count(), 16);
        assert_eq!(plan.strategy, StrategyKey::Vectorized);
        // each lane writes 2 of an 8-element block
        assert!(plan.atomic_add_required);
        assert!(plan.variant.atomic_add);
    }

    #[test]
    fn test_scatter_add_split_row_is_atomic() {
        let input = TilingInput::new(vec![
            operand("var", &[2, 4096], DType::Float32),
            operand("index", &[2, 4096], DType::Int32),
            operand("updates", &[2, 4096], DType::Float32),
        ])
        .with_attrs(OpAttrs {
            axis: Some(Axis::last()),
            reduce: ReduceMode::Add,
            ..OpAttrs::default()
        });
        let registry = TilingRegistry::with_builtin();
        let plan = planner()
            .plan_op(&registry, "scatter_elements", &input)
            .unwrap();
        assert!(plan.atomic_add_required);
        assert_eq!(plan.record.core_group_num, 2);
        assert_eq!(plan.record.group_former_lanes, 24);

        let strict = Planner::new(
            Preset::Vector48.limits(),
            PlannerOptions {
                deterministic: true,
                ..PlannerOptions::default()
            },
        );
        assert!(matches!(
            strict.plan_op(&registry, "scatter_elements", &input),
            Err(TilingError::InvalidAttribute {
                name: "deterministic",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_sized_axis_is_rejected() {
        let input = TilingInput::new(vec![operand("x", &[4, 0, 8], DType::Float32)]);
        assert!(matches!(
            planner().plan(&crate::ops::Elementwise, &input),
            Err(TilingError::EmptyWorkload { .. })
        ));
    }

    #[test]
    fn test_insufficient_scratch() {
        let limits = PlatformLimits::new(8, 1100, 32).unwrap();
        let input = TilingInput::new(vec![
            operand("a", &[64], DType::Float32),
            operand("b", &[64], DType::Float32),
            operand("c", &[64], DType::Float32),
        ]);
        let err = Planner::new(limits, PlannerOptions::default())
            .plan(&crate::ops::Elementwise, &input)
            .unwrap_err();
        assert!(matches!(
            err,
            TilingError::InsufficientScratch {
                required: 192,
                available: 76
            }
        ));
    }

    #[test]
    fn test_scalar_floor_counts_both_buffers() {
        let limits = PlatformLimits::new(8, 1124, 32).unwrap();
        let input = TilingInput::new(vec![
            operand("a", &[64], DType::Float32),
            operand("b", &[64], DType::Float32),
            operand("c", &[64], DType::Float32),
        ]);
        let double = Planner::new(limits, PlannerOptions::default());
        assert!(matches!(
            double.plan(&crate::ops::Elementwise, &input),
            Err(TilingError::InsufficientScratch {
                required: 192,
                available: 100
            })
        ));

        let single = PlannerOptions {
            double_buffer: false,
            ..PlannerOptions::default()
        };
        let plan = Planner::new(limits, single)
            .plan(&crate::ops::Elementwise, &input)
            .unwrap();
        // one block per lane, 3 * 8 * 4 bytes staged once
        assert_eq!(plan.strategy, StrategyKey::Vectorized);
        assert!(plan.buffer.required_bytes(&[4, 4, 4]) <= 100);
    }

    #[test]
    fn test_partial_last_window_slice_is_atomic() {
        let limits = PlatformLimits::new(4, 1280, 32).unwrap();
        let input = TilingInput::new(vec![operand("input", &[4, 993], DType::Float32)])
            .with_attrs(OpAttrs {
                window: Some(3),
                ..OpAttrs::default()
            });
        let plan = Planner::new(limits, PlannerOptions::default())
            .plan(&crate::ops::WindowReduce, &input)
            .unwrap();

        // one row per lane, so no row is shared
        assert_eq!(plan.launch_lane_count(), 4);
        assert_eq!(plan.strategy, StrategyKey::Sliced);
        assert_eq!(plan.slices.count, 32);
        assert_eq!(plan.slices.chunk, 32);
        assert_eq!(plan.slices.tail, 1);
        assert!(plan.atomic_add_required);
        assert!(plan.record.flags().contains(RecordFlags::ATOMIC_ADD));

        // a full last slice needs no accumulation
        let even = TilingInput::new(vec![operand("input", &[4, 992], DType::Float32)])
            .with_attrs(OpAttrs {
                window: Some(4),
                ..OpAttrs::default()
            });
        let plan = Planner::new(limits, PlannerOptions::default())
            .plan(&crate::ops::WindowReduce, &even)
            .unwrap();
        assert_eq!(plan.slices.tail, 32);
        assert!(!plan.atomic_add_required);
    }

    #[test]
    fn test_identical_inputs_identical_records() {
        let input = gather(&[4, 4, 8], &[4, 4, 2], -1);
        let a = planner().plan(&crate::ops::GatherElements, &input).unwrap();
        let b = planner().plan(&crate::ops::GatherElements, &input).unwrap();
        assert_eq!(a.record.to_bytes(), b.record.to_bytes());
    }

    #[test]
    fn test_report() {
        let plan = planner()
            .plan(&crate::ops::GatherElements, &gather(&[4, 4, 8], &[4, 4, 2], -1))
            .unwrap();
        let report = plan.to_string();
        assert!(report.starts_with("Tiling Plan: gather_elements\n"));
        assert!(report.contains("Strategy:   vectorized"));
        assert!(report.contains("Atomic add: yes"));
    }
}
