//! # Tiling Record
//!
//! The fixed-layout plan handed to the launcher and the kernel.
//!
//! ## Layout (version 1)
//!
//! All integers are little-endian. Offsets are in bytes.
//!
//! | Offset | Size | Content |
//! |--------|------|---------|
//! | 0      | 4    | magic `LTRC` |
//! | 4      | 4    | `u32` version |
//! | 8      | 32   | 8 × `u32`: strategy key, variant key, flags, launch lanes, operand count, rank, partition axis, dtype code |
//! | 40     | 264  | 33 × `u64`, see below |
//! | 304    | 256  | 4 operands × 8 × `u64` merged dims |
//! | 560    | 256  | 4 operands × 8 × `i64` element strides |
//!
//! The `u64` block holds, in order:
//!
//! ```text
//! rows, row_len, out_row_len, resident_len,
//! former_count, former_chunk, tail_count, tail_chunk,
//! core_group_num, group_former_count, group_former_lanes, group_tail_lanes,
//! inner_unit, inner_ff_count, inner_ff_chunk, inner_ft_chunk,
//! inner_tf_count, inner_tf_chunk, inner_tt_chunk, row_pad,
//! elements_per_slot, rows_per_slot, row_aligned_len,
//! rows_per_loop, former_loops, former_tail_rows, tail_loops, tail_tail_rows,
//! slice_count, slice_len, slice_tail, slice_tail_aligned,
//! scratch_workspace_bytes
//! ```
//!
//! Unused operand and axis slots are zero. A new field means a new version.

use crate::{BufferPlan, KernelVariant, StrategyKey};
use bitflags::bitflags;
use lanetile_shape::{MergedShapes, MAX_RANK};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of operands a record describes.
pub const MAX_OPERANDS: usize = 4;

const MAGIC: [u8; 4] = *b"LTRC";
const NARROW_FIELDS: usize = 8;
const WIDE_FIELDS: usize = 33;

bitflags! {
    /// Boolean plan properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RecordFlags: u32 {
        /// Scratch slots are double-buffered.
        const DOUBLE_BUFFERED = 0b0000_0001;
        /// A full aligned row fits in one slot.
        const FITS_FULL_ROW = 0b0000_0010;
        /// Rows are cut into column slices.
        const NEEDS_SLICING = 0b0000_0100;
        /// The scalar tier was forced.
        const SCALAR_FALLBACK = 0b0000_1000;
        /// Output must be accumulated atomically.
        const ATOMIC_ADD = 0b0001_0000;
        /// Operands are reorganized so the partition axis is contiguous.
        const TRANSPOSED = 0b0010_0000;
        /// Rows are split inside lane groups.
        const NESTED = 0b0100_0000;
    }
}

impl RecordFlags {
    /// Flags describing a buffer plan.
    #[must_use]
    pub fn from_buffer(plan: &BufferPlan) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::DOUBLE_BUFFERED, plan.double_buffered);
        flags.set(Self::FITS_FULL_ROW, plan.fits_full_row);
        flags.set(Self::NEEDS_SLICING, plan.needs_slicing);
        flags.set(Self::SCALAR_FALLBACK, plan.needs_scalar_fallback);
        flags
    }
}

/// Errors from record encoding and decoding.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Input is not exactly one record long.
    #[error("record must be {expected} bytes, got {got}")]
    Length {
        /// Encoded length of the supported version.
        expected: usize,
        /// Length of the input.
        got: usize,
    },

    /// Input does not start with the record magic.
    #[error("bad record magic {0:?}")]
    BadMagic([u8; 4]),

    /// Record written by an unknown layout version.
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u32),

    /// More operands than the layout has slots for.
    #[error("{count} operands exceed the record limit of {MAX_OPERANDS}")]
    TooManyOperands {
        /// Operands that were offered.
        count: usize,
    },
}

/// Flattened tiling plan.
///
/// Created once per planning call and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilingRecord {
    /// [`StrategyKey`] code.
    pub strategy_key: u32,
    /// [`KernelVariant`] key.
    pub variant_key: u32,
    /// [`RecordFlags`] bits.
    pub flags: u32,
    /// Lanes the launcher must start.
    pub launch_lane_count: u32,
    /// Operands described by `dims` and `strides`.
    pub operand_count: u32,
    /// Merged rank.
    pub rank: u32,
    /// Partition axis in the merged shapes.
    pub partition_axis: u32,
    /// Primary dtype code.
    pub dtype_code: u32,

    /// Rows to process.
    pub rows: u64,
    /// Elements per row along the partition axis.
    pub row_len: u64,
    /// Output elements per row.
    pub out_row_len: u64,
    /// Elements per row that stay resident while the row is processed.
    pub resident_len: u64,

    /// Lanes taking `former_chunk` rows.
    pub former_count: u64,
    /// Rows per former lane.
    pub former_chunk: u64,
    /// Lanes taking `tail_chunk` rows.
    pub tail_count: u64,
    /// Rows per tail lane.
    pub tail_chunk: u64,

    /// Lane groups, one per row, when rows are split. Zero otherwise.
    pub core_group_num: u64,
    /// Groups with `group_former_lanes` lanes.
    pub group_former_count: u64,
    /// Lanes per former group.
    pub group_former_lanes: u64,
    /// Lanes per tail group.
    pub group_tail_lanes: u64,

    /// Elements per unit of the in-row split.
    pub inner_unit: u64,
    /// Lanes of a former group taking `inner_ff_chunk` units.
    pub inner_ff_count: u64,
    /// Units per former lane of a former group.
    pub inner_ff_chunk: u64,
    /// Units per tail lane of a former group.
    pub inner_ft_chunk: u64,
    /// Lanes of a tail group taking `inner_tf_chunk` units.
    pub inner_tf_count: u64,
    /// Units per former lane of a tail group.
    pub inner_tf_chunk: u64,
    /// Units per tail lane of a tail group.
    pub inner_tt_chunk: u64,
    /// Padding elements in the last unit of a row.
    pub row_pad: u64,

    /// Aligned elements per operand slot.
    pub elements_per_slot: u64,
    /// Whole rows per slot.
    pub rows_per_slot: u64,
    /// Row length padded to the alignment block.
    pub row_aligned_len: u64,

    /// Rows moved per loop iteration.
    pub rows_per_loop: u64,
    /// Loop iterations of a former lane.
    pub former_loops: u64,
    /// Rows in the last iteration of a former lane.
    pub former_tail_rows: u64,
    /// Loop iterations of a tail lane.
    pub tail_loops: u64,
    /// Rows in the last iteration of a tail lane.
    pub tail_tail_rows: u64,

    /// Slices per row.
    pub slice_count: u64,
    /// Elements per slice.
    pub slice_len: u64,
    /// Elements in the last slice.
    pub slice_tail: u64,
    /// Last slice padded to the alignment block.
    pub slice_tail_aligned: u64,

    /// Global workspace the caller must allocate, in bytes.
    pub scratch_workspace_bytes: u64,

    /// Merged dims per operand.
    pub dims: [[u64; MAX_RANK]; MAX_OPERANDS],
    /// Element strides per operand.
    pub strides: [[i64; MAX_RANK]; MAX_OPERANDS],
}

/// Byte cursor over an encoded record.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }
}

impl TilingRecord {
    /// Current layout version.
    pub const VERSION: u32 = 1;

    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize =
        8 + 4 * NARROW_FIELDS + 8 * WIDE_FIELDS + 2 * 8 * MAX_RANK * MAX_OPERANDS;

    /// Chosen strategy, if the key is valid.
    #[must_use]
    pub fn strategy(&self) -> Option<StrategyKey> {
        StrategyKey::from_code(self.strategy_key)
    }

    /// Kernel variant, if the key is valid.
    #[must_use]
    pub fn variant(&self) -> Option<KernelVariant> {
        KernelVariant::from_key(self.variant_key)
    }

    /// Plan flags.
    #[must_use]
    pub const fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flags)
    }

    /// Whether the consumer must accumulate output atomically.
    #[must_use]
    pub const fn atomic_add_required(&self) -> bool {
        self.flags().contains(RecordFlags::ATOMIC_ADD)
    }

    /// Copy merged dims and strides of every operand into the record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::TooManyOperands`] if there are more than
    /// [`MAX_OPERANDS`] operands.
    pub fn set_shapes(&mut self, shapes: &MergedShapes) -> Result<(), RecordError> {
        let count = shapes.operand_count();
        if count > MAX_OPERANDS {
            return Err(RecordError::TooManyOperands { count });
        }
        self.dims = Default::default();
        self.strides = Default::default();
        for operand in 0..count {
            let dims = shapes.shape(operand).dims();
            self.dims[operand][..dims.len()].copy_from_slice(dims);
            let strides = shapes.strides(operand);
            self.strides[operand][..strides.values().len()].copy_from_slice(strides.values());
        }
        self.operand_count = narrow(count);
        self.rank = narrow(shapes.rank());
        self.partition_axis = narrow(shapes.partition_axis());
        Ok(())
    }

    /// Encode the record.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&Self::VERSION.to_le_bytes());

        for v in [
            self.strategy_key,
            self.variant_key,
            self.flags,
            self.launch_lane_count,
            self.operand_count,
            self.rank,
            self.partition_axis,
            self.dtype_code,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        for v in self.wide_fields() {
            buf.extend_from_slice(&v.to_le_bytes());
        }

        for operand in &self.dims {
            for v in operand {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        for operand in &self.strides {
            for v in operand {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        debug_assert_eq!(buf.len(), Self::ENCODED_LEN);
        buf
    }

    /// Decode a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has the wrong length, magic or version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(RecordError::Length {
                expected: Self::ENCODED_LEN,
                got: bytes.len(),
            });
        }
        let mut r = Reader { bytes, pos: 0 };
        let magic: [u8; 4] = r.take();
        if magic != MAGIC {
            return Err(RecordError::BadMagic(magic));
        }
        let version = r.u32();
        if version != Self::VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }

        // Field initializers run in source order, which is the layout order.
        let mut record = Self {
            strategy_key: r.u32(),
            variant_key: r.u32(),
            flags: r.u32(),
            launch_lane_count: r.u32(),
            operand_count: r.u32(),
            rank: r.u32(),
            partition_axis: r.u32(),
            dtype_code: r.u32(),
            rows: r.u64(),
            row_len: r.u64(),
            out_row_len: r.u64(),
            resident_len: r.u64(),
            former_count: r.u64(),
            former_chunk: r.u64(),
            tail_count: r.u64(),
            tail_chunk: r.u64(),
            core_group_num: r.u64(),
            group_former_count: r.u64(),
            group_former_lanes: r.u64(),
            group_tail_lanes: r.u64(),
            inner_unit: r.u64(),
            inner_ff_count: r.u64(),
            inner_ff_chunk: r.u64(),
            inner_ft_chunk: r.u64(),
            inner_tf_count: r.u64(),
            inner_tf_chunk: r.u64(),
            inner_tt_chunk: r.u64(),
            row_pad: r.u64(),
            elements_per_slot: r.u64(),
            rows_per_slot: r.u64(),
            row_aligned_len: r.u64(),
            rows_per_loop: r.u64(),
            former_loops: r.u64(),
            former_tail_rows: r.u64(),
            tail_loops: r.u64(),
            tail_tail_rows: r.u64(),
            slice_count: r.u64(),
            slice_len: r.u64(),
            slice_tail: r.u64(),
            slice_tail_aligned: r.u64(),
            scratch_workspace_bytes: r.u64(),
            dims: [[0; MAX_RANK]; MAX_OPERANDS],
            strides: [[0; MAX_RANK]; MAX_OPERANDS],
        };

        for operand in &mut record.dims {
            for v in operand.iter_mut() {
                *v = r.u64();
            }
        }
        for operand in &mut record.strides {
            for v in operand.iter_mut() {
                *v = r.i64();
            }
        }
        Ok(record)
    }

    fn wide_fields(&self) -> [u64; WIDE_FIELDS] {
        [
            self.rows,
            self.row_len,
            self.out_row_len,
            self.resident_len,
            self.former_count,
            self.former_chunk,
            self.tail_count,
            self.tail_chunk,
            self.core_group_num,
            self.group_former_count,
            self.group_former_lanes,
            self.group_tail_lanes,
            self.inner_unit,
            self.inner_ff_count,
            self.inner_ff_chunk,
            self.inner_ft_chunk,
            self.inner_tf_count,
            self.inner_tf_chunk,
            self.inner_tt_chunk,
            self.row_pad,
            self.elements_per_slot,
            self.rows_per_slot,
            self.row_aligned_len,
            self.rows_per_loop,
            self.former_loops,
            self.former_tail_rows,
            self.tail_loops,
            self.tail_tail_rows,
            self.slice_count,
            self.slice_len,
            self.slice_tail,
            self.slice_tail_aligned,
            self.scratch_workspace_bytes,
        ]
    }
}

fn narrow(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Global workspace bytes for a plan.
///
/// Sized for the largest tier the kernel may take at run time: one staged
/// slot of the widest operand, or one alignment block for the scalar tier.
/// The slot is scaled by the buffering multiplier and the operand count,
/// then the fixed per-launch synchronization workspace is added.
#[must_use]
pub fn scratch_workspace_bytes(
    plan: &BufferPlan,
    elem_sizes: &[usize],
    alignment: u32,
    sync_workspace_bytes: u64,
) -> u64 {
    let widest = elem_sizes.iter().copied().max().unwrap_or(0) as u64;
    let slot_bytes = plan
        .elements_per_slot
        .saturating_mul(widest)
        .max(u64::from(alignment));
    slot_bytes
        .saturating_mul(plan.multiplier())
        .saturating_mul(elem_sizes.len() as u64)
        .saturating_add(sync_workspace_bytes)
}
