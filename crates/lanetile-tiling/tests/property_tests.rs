//! Property tests for lanetile-tiling
//!
//! These tests verify the invariants every emitted plan must satisfy.

use lanetile_shape::{Axis, DType, Shape};
use lanetile_target::{PlatformLimits, Preset};
use lanetile_tiling::{
    partition, partition_nested, BufferPlanner, BufferRequest, LaneSplit, OpAttrs, Operand,
    Planner, PlannerOptions, StrategyKey, TailResolver, TilingInput, TilingRecord, TilingRegistry,
};
use proptest::prelude::*;

fn elem_size() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1usize), Just(2), Just(4), Just(8)]
}

fn alignment() -> impl Strategy<Value = u32> {
    prop_oneof![Just(16u32), Just(32), Just(64), Just(128)]
}

// ============================================================
// Partition properties
// ============================================================

proptest! {
    #[test]
    fn partition_is_complete(total in 1u64..1_000_000, lanes in 1u32..256) {
        let plan = partition(total, lanes).unwrap();
        prop_assert_eq!(plan.total(), total);
        prop_assert!(plan.used_lanes() <= lanes);
        prop_assert!(plan.tail_chunk() <= plan.former_chunk());
        prop_assert!(plan.tail_chunk() > 0);
    }

    #[test]
    fn partition_ranges_tile_the_axis(total in 1u64..10_000, lanes in 1u32..64) {
        let plan = partition(total, lanes).unwrap();
        let mut next = 0;
        for range in plan.ranges() {
            prop_assert_eq!(range.start, next);
            prop_assert!(range.end > range.start);
            next = range.end;
        }
        prop_assert_eq!(next, total);
    }

    #[test]
    fn nested_partition_covers_every_row(
        outer in 1u64..32,
        inner in 1u64..2_000,
        lanes in 1u32..96,
    ) {
        match partition_nested(outer, inner, lanes).unwrap() {
            None => prop_assert!(outer >= u64::from(lanes)),
            Some(nested) => {
                prop_assert!(nested.used_lanes() <= lanes);
                prop_assert_eq!(nested.former_group().total(), inner);
                prop_assert_eq!(nested.tail_group().total(), inner);
                prop_assert!(nested.tail_group().former_chunk() >= nested.former_group().former_chunk());

                let mut covered = vec![0u64; usize::try_from(outer).unwrap()];
                for lane in 0..nested.used_lanes() {
                    let (row, range) = nested.lane_assignment(lane).unwrap();
                    covered[usize::try_from(row).unwrap()] += range.end - range.start;
                }
                prop_assert!(covered.iter().all(|&c| c == inner));
            }
        }
    }
}

// ============================================================
// Buffer properties
// ============================================================

proptest! {
    #[test]
    fn buffer_never_exceeds_capacity(
        sizes in prop::collection::vec(elem_size(), 1..4),
        row in 1u64..200_000,
        capacity in 1u64..400_000,
        align in alignment(),
        double in any::<bool>(),
    ) {
        let plan = BufferPlanner::default()
            .plan(&BufferRequest::new(&sizes, row, capacity, align, double))
            .unwrap();
        prop_assert!(plan.required_bytes(&sizes) <= capacity);
        if plan.fits_full_row {
            prop_assert!(plan.bytes_per_row * plan.multiplier() <= capacity);
            prop_assert!(plan.rows_per_slot >= 1);
        }
        if !plan.needs_scalar_fallback {
            prop_assert!(plan.elements_per_slot > 0);
            prop_assert_eq!(plan.elements_per_slot % plan.block_elems, 0);
        }
    }

    #[test]
    fn tail_never_zero_and_never_larger(total in 1u64..100_000, chunk in 1u64..5_000, block in 1u64..64) {
        let tail = TailResolver::new(block).resolve(total, chunk);
        prop_assert!(tail.tail > 0);
        prop_assert!(tail.tail <= tail.chunk);
        prop_assert_eq!(tail.chunk * (tail.count - 1) + tail.tail, total);
        prop_assert_eq!(tail.tail_aligned % block, 0);
    }
}

// ============================================================
// Planner properties
// ============================================================

fn elementwise(rows: u64, cols: u64, dtype: DType) -> TilingInput {
    TilingInput::new(vec![
        Operand::new("x", Shape::new([rows, cols]).unwrap(), dtype),
        Operand::new("y", Shape::new([rows, 1]).unwrap(), dtype),
    ])
}

proptest! {
    #[test]
    fn identical_inputs_give_identical_records(
        rows in 1u64..512,
        cols in 1u64..50_000,
        lanes in 1u32..64,
    ) {
        let limits = PlatformLimits::new(lanes, 192 * 1024, 32).unwrap();
        let registry = TilingRegistry::with_builtin();
        let input = elementwise(rows, cols, DType::Float16);
        let planner = Planner::new(limits, PlannerOptions::default());

        let a = planner.plan_op(&registry, "elementwise", &input).unwrap();
        let b = planner.plan_op(&registry, "elementwise", &input).unwrap();
        prop_assert_eq!(a.record.to_bytes(), b.record.to_bytes());
        prop_assert!(a.launch_lane_count() <= lanes);

        let parsed = TilingRecord::from_bytes(&a.record.to_bytes()).unwrap();
        prop_assert_eq!(parsed, a.record);
    }

    #[test]
    fn shrinking_scratch_never_enriches_strategy(
        rows in 1u64..256,
        cols in 1u64..100_000,
        scratch in 2_048u64..400_000,
        shrink in 1u64..2_000,
    ) {
        let registry = TilingRegistry::with_builtin();
        let input = elementwise(rows, cols, DType::Float32);
        let plan_with = |bytes: u64| -> Option<StrategyKey> {
            let limits = PlatformLimits::new(48, bytes, 32).ok()?;
            Planner::new(limits, PlannerOptions::default())
                .plan_op(&registry, "elementwise", &input)
                .ok()
                .map(|p| p.strategy)
        };

        let larger = plan_with(scratch);
        let smaller = plan_with(scratch.saturating_sub(shrink).max(1));
        if let (Some(larger), Some(smaller)) = (larger, smaller) {
            // transposition depends on shape alone, not on capacity
            let tier = |k: StrategyKey| k.min(StrategyKey::Vectorized);
            prop_assert!(tier(smaller) <= tier(larger));
        }
    }
}

// ============================================================
// Operator coverage properties
// ============================================================

fn operator_input(op: &str, dims: &[u64], axis: usize) -> TilingInput {
    let shape = Shape::new(dims.iter().copied()).unwrap();
    let operand = |name: &str, dtype: DType| Operand::new(name, shape.clone(), dtype);
    let axis = Some(Axis::new(i64::try_from(axis).unwrap()));
    match op {
        "elementwise" => TilingInput::new(vec![
            operand("x", DType::Float32),
            operand("y", DType::Float32),
        ]),
        "gather_elements" => TilingInput::new(vec![
            operand("data", DType::Float32),
            operand("index", DType::Int32),
        ])
        .with_attrs(OpAttrs {
            axis,
            ..OpAttrs::default()
        }),
        "scatter_elements" => TilingInput::new(vec![
            operand("var", DType::Float32),
            operand("index", DType::Int32),
            operand("updates", DType::Float32),
        ])
        .with_attrs(OpAttrs {
            axis,
            ..OpAttrs::default()
        }),
        _ => TilingInput::new(vec![operand("input", DType::Float32)]).with_attrs(OpAttrs {
            window: Some(1),
            ..OpAttrs::default()
        }),
    }
}

proptest! {
    #[test]
    fn equal_shapes_cover_every_element(
        op in prop_oneof![
            Just("elementwise"),
            Just("gather_elements"),
            Just("scatter_elements"),
            Just("window_reduce"),
        ],
        dims in prop::collection::vec(1u64..64, 1..=3),
        axis_seed in 0usize..3,
    ) {
        let axis = axis_seed % dims.len();
        let elements: u64 = dims.iter().product();
        let registry = TilingRegistry::with_builtin();
        let plan = Planner::new(Preset::Vector48.limits(), PlannerOptions::default())
            .plan_op(&registry, op, &operator_input(op, &dims, axis))
            .unwrap();
        let r = &plan.record;

        prop_assert_eq!(r.rows * r.row_len, elements);
        prop_assert_eq!(r.former_count * r.former_chunk + r.tail_count * r.tail_chunk, r.rows);

        if let LaneSplit::Nested(nested) = &plan.split {
            let covered = nested.former_group().total() * r.inner_unit;
            prop_assert!(covered >= r.row_len);
            prop_assert!(covered < r.row_len + r.inner_unit);
            prop_assert_eq!(nested.tail_group().total(), nested.former_group().total());
        }
    }
}
