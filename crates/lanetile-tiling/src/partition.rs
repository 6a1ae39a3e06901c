//! # Lane Partitioning
//!
//! Splits a count of work items across compute lanes into balanced,
//! contiguous chunks.
//!
//! ## Former/Tail Split
//!
//! With `used = min(total, lanes)` lanes, the first `total % used` lanes
//! (the *former* group) take `ceil(total / used)` items and the remaining
//! lanes (the *tail* group) take `floor(total / used)`:
//!
//! ```text
//! total = 100, lanes = 48
//!
//! lane:   0   1   2   3 | 4   5  ...  47
//! chunk:  3   3   3   3 | 2   2  ...   2
//!         former (4)    | tail (44)
//! ```
//!
//! When the split is even there is no tail group and the tail chunk equals the
//! former chunk, so a tail chunk is never zero.
//!
//! ## Nested Split
//!
//! When there are fewer rows than lanes, each row gets a group of lanes and
//! the row itself is split inside its group. Lane groups are balanced the
//! same way, giving four chunk sizes: former and tail chunks for the lanes of
//! former groups, and for the lanes of tail groups.
//!
//! Chunking is deterministic: the same inputs always yield the same ranges.

use crate::{ceil_div, TilingError, TilingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Balanced former/tail split of `total` items over lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionPlan {
    used_lanes: u32,
    former_count: u32,
    former_chunk: u64,
    tail_count: u32,
    tail_chunk: u64,
}

/// Split `total` items across at most `lanes` lanes.
///
/// # Errors
///
/// Returns [`TilingError::InsufficientLanes`] if `lanes` is zero and
/// [`TilingError::EmptyWorkload`] if `total` is zero.
pub fn partition(total: u64, lanes: u32) -> TilingResult<PartitionPlan> {
    if lanes == 0 {
        return Err(TilingError::InsufficientLanes { lanes });
    }
    if total == 0 {
        return Err(TilingError::EmptyWorkload {
            reason: "nothing to partition".to_string(),
        });
    }

    // used <= lanes, so the narrowing below is lossless
    let used = total.min(u64::from(lanes));
    let rem = total % used;

    let former_count = if rem == 0 { used } else { rem };
    let former_chunk = ceil_div(total, used);
    let mut tail_count = used - former_count;
    let mut tail_chunk = total / used;

    if tail_count == 0 || tail_chunk == 0 {
        tail_count = 0;
        tail_chunk = former_chunk;
    }

    #[allow(clippy::cast_possible_truncation)]
    let plan = PartitionPlan {
        used_lanes: used as u32,
        former_count: former_count as u32,
        former_chunk,
        tail_count: tail_count as u32,
        tail_chunk,
    };
    debug_assert_eq!(plan.total(), total);
    Ok(plan)
}

impl PartitionPlan {
    /// Lanes that receive work.
    #[must_use]
    pub const fn used_lanes(&self) -> u32 {
        self.used_lanes
    }

    /// Lanes in the former group.
    #[must_use]
    pub const fn former_count(&self) -> u32 {
        self.former_count
    }

    /// Items per former lane.
    #[must_use]
    pub const fn former_chunk(&self) -> u64 {
        self.former_chunk
    }

    /// Lanes in the tail group.
    #[must_use]
    pub const fn tail_count(&self) -> u32 {
        self.tail_count
    }

    /// Items per tail lane. Equal to the former chunk when there is no tail.
    #[must_use]
    pub const fn tail_chunk(&self) -> u64 {
        self.tail_chunk
    }

    /// Whether the tail group is non-empty.
    #[must_use]
    pub const fn has_tail(&self) -> bool {
        self.tail_count > 0
    }

    /// Total items covered by the plan.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.former_count as u64 * self.former_chunk + self.tail_count as u64 * self.tail_chunk
    }

    /// Items assigned to `lane`, or `None` if the lane is idle.
    #[must_use]
    pub fn chunk_of(&self, lane: u32) -> Option<u64> {
        if lane < self.former_count {
            Some(self.former_chunk)
        } else if lane < self.used_lanes {
            Some(self.tail_chunk)
        } else {
            None
        }
    }

    /// Contiguous item range assigned to `lane`, or `None` if the lane is idle.
    #[must_use]
    pub fn lane_range(&self, lane: u32) -> Option<Range<u64>> {
        let chunk = self.chunk_of(lane)?;
        let start = if lane < self.former_count {
            u64::from(lane) * self.former_chunk
        } else {
            u64::from(self.former_count) * self.former_chunk
                + u64::from(lane - self.former_count) * self.tail_chunk
        };
        Some(start..start + chunk)
    }

    /// Ranges of every used lane, in lane order.
    #[must_use]
    pub fn ranges(&self) -> Vec<Range<u64>> {
        (0..self.used_lanes)
            .filter_map(|lane| self.lane_range(lane))
            .collect()
    }
}

impl fmt::Display for PartitionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lanes: {} x {} + {} x {}",
            self.used_lanes, self.former_count, self.former_chunk, self.tail_count, self.tail_chunk
        )
    }
}

/// Two-level split: rows over lane groups, then each row inside its group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NestedPartition {
    core_group_num: u32,
    groups: PartitionPlan,
    former_group: PartitionPlan,
    tail_group: PartitionPlan,
}

/// Split `outer` rows of `inner` items each when there are fewer rows than
/// lanes.
///
/// Returns `Ok(None)` when `outer >= lanes`; a single-axis split over rows
/// then already keeps every lane busy.
///
/// # Errors
///
/// Returns [`TilingError::InsufficientLanes`] if `lanes` is zero and
/// [`TilingError::EmptyWorkload`] if either count is zero.
pub fn partition_nested(outer: u64, inner: u64, lanes: u32) -> TilingResult<Option<NestedPartition>> {
    if lanes == 0 {
        return Err(TilingError::InsufficientLanes { lanes });
    }
    if outer == 0 || inner == 0 {
        return Err(TilingError::EmptyWorkload {
            reason: format!("nested split of {outer} x {inner} items"),
        });
    }
    if outer >= u64::from(lanes) {
        return Ok(None);
    }

    #[allow(clippy::cast_possible_truncation)]
    let core_group_num = outer as u32;
    let groups = partition(u64::from(lanes), core_group_num)?;

    #[allow(clippy::cast_possible_truncation)]
    let former_group = partition(inner, groups.former_chunk() as u32)?;
    #[allow(clippy::cast_possible_truncation)]
    let tail_group = partition(inner, groups.tail_chunk() as u32)?;

    Ok(Some(NestedPartition {
        core_group_num,
        groups,
        former_group,
        tail_group,
    }))
}

impl NestedPartition {
    /// Number of lane groups, one per row.
    #[must_use]
    pub const fn core_group_num(&self) -> u32 {
        self.core_group_num
    }

    /// How lanes are distributed over groups.
    #[must_use]
    pub const fn groups(&self) -> &PartitionPlan {
        &self.groups
    }

    /// Row split inside a former group.
    #[must_use]
    pub const fn former_group(&self) -> &PartitionPlan {
        &self.former_group
    }

    /// Row split inside a tail group.
    #[must_use]
    pub const fn tail_group(&self) -> &PartitionPlan {
        &self.tail_group
    }

    /// Lanes that receive work across all groups.
    #[must_use]
    pub const fn used_lanes(&self) -> u32 {
        self.groups.former_count() * self.former_group.used_lanes()
            + self.groups.tail_count() * self.tail_group.used_lanes()
    }

    /// Whether some row is shared by more than one lane.
    #[must_use]
    pub const fn splits_rows(&self) -> bool {
        self.former_group.used_lanes() > 1 || self.tail_group.used_lanes() > 1
    }

    /// Largest chunk any lane processes within a row.
    #[must_use]
    pub fn max_chunk(&self) -> u64 {
        self.former_group
            .former_chunk()
            .max(self.tail_group.former_chunk())
    }

    /// Row index and item range of `lane`, or `None` if the lane is idle.
    ///
    /// Lanes are numbered group by group, so the lanes of a row are
    /// contiguous.
    #[must_use]
    pub fn lane_assignment(&self, lane: u32) -> Option<(u64, Range<u64>)> {
        let former_span = self.groups.former_count() * self.former_group.used_lanes();
        if lane < former_span {
            let per = self.former_group.used_lanes();
            let range = self.former_group.lane_range(lane % per)?;
            return Some((u64::from(lane / per), range));
        }
        let rel = lane - former_span;
        let per = self.tail_group.used_lanes();
        let group = rel / per;
        if group >= self.groups.tail_count() {
            return None;
        }
        let range = self.tail_group.lane_range(rel % per)?;
        Some((u64::from(self.groups.former_count() + group), range))
    }
}

/// Lane split chosen for a workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaneSplit {
    /// Whole rows per lane.
    Rows(PartitionPlan),
    /// Fewer rows than lanes: rows are split inside lane groups.
    Nested(NestedPartition),
}

impl LaneSplit {
    /// Lanes that receive work.
    #[must_use]
    pub const fn used_lanes(&self) -> u32 {
        match self {
            Self::Rows(plan) => plan.used_lanes(),
            Self::Nested(nested) => nested.used_lanes(),
        }
    }

    /// Whether some row is shared by more than one lane.
    #[must_use]
    pub const fn splits_rows(&self) -> bool {
        match self {
            Self::Rows(_) => false,
            Self::Nested(nested) => nested.splits_rows(),
        }
    }
}
