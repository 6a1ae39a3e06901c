//! Platform limits for lane tiling.
//!
//! This crate describes the machine a tiling plan is computed for: how many
//! parallel compute lanes it has, how much scratch memory each lane owns, and
//! the alignment every scratch buffer must respect.
//!
//! # Presets
//!
//! Common targets are available as [`Preset`] values:
//!
//! - **vector-48**: 48 lanes, 192 KiB scratch, 32-byte alignment
//! - **vector-40**: 40 lanes, 192 KiB scratch, 32-byte alignment
//! - **vector-24**: 24 lanes, 256 KiB scratch, 32-byte alignment
//! - **edge-8**: 8 lanes, 64 KiB scratch, 32-byte alignment
//!
//! # Descriptor Format
//!
//! Custom targets are given as comma-separated `key=value` pairs:
//! `lanes=<n>,scratch=<bytes>[k|m],align=<bytes>`
//!
//! For example:
//! - `lanes=48,scratch=192k,align=32`
//! - `lanes=2,scratch=4096,align=64`

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Immutable description of a tiling target.
///
/// Values are validated on construction: at least one lane, non-empty
/// scratch, and a power-of-two alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLimits", into = "RawLimits")]
pub struct PlatformLimits {
    lane_count: u32,
    scratch_bytes_per_lane: u64,
    alignment_bytes: u32,
}

impl PlatformLimits {
    /// Create validated platform limits.
    ///
    /// # Errors
    ///
    /// Returns an error if `lane_count` or `scratch_bytes_per_lane` is zero,
    /// or if `alignment_bytes` is not a power of two.
    pub fn new(
        lane_count: u32,
        scratch_bytes_per_lane: u64,
        alignment_bytes: u32,
    ) -> Result<Self, TargetError> {
        if lane_count == 0 {
            return Err(TargetError::NoLanes);
        }
        if scratch_bytes_per_lane == 0 {
            return Err(TargetError::NoScratch);
        }
        if !alignment_bytes.is_power_of_two() {
            return Err(TargetError::BadAlignment(alignment_bytes));
        }
        Ok(Self {
            lane_count,
            scratch_bytes_per_lane,
            alignment_bytes,
        })
    }

    /// Number of parallel compute lanes.
    #[must_use]
    pub const fn lane_count(&self) -> u32 {
        self.lane_count
    }

    /// Scratch capacity of a single lane, in bytes.
    #[must_use]
    pub const fn scratch_bytes_per_lane(&self) -> u64 {
        self.scratch_bytes_per_lane
    }

    /// Required buffer alignment, in bytes.
    #[must_use]
    pub const fn alignment_bytes(&self) -> u32 {
        self.alignment_bytes
    }

    /// Number of elements of `elem_size` bytes in one alignment block.
    ///
    /// Elements wider than the alignment yield a block of one element.
    #[must_use]
    pub const fn block_elems(&self, elem_size: usize) -> u64 {
        let block = self.alignment_bytes as u64 / elem_size as u64;
        if block == 0 {
            1
        } else {
            block
        }
    }

    /// Render the limits in descriptor form.
    #[must_use]
    pub fn descriptor(&self) -> String {
        format!(
            "lanes={},scratch={},align={}",
            self.lane_count, self.scratch_bytes_per_lane, self.alignment_bytes
        )
    }
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Preset::Vector48.limits()
    }
}

impl fmt::Display for PlatformLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

/// Unvalidated serde form of [`PlatformLimits`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct RawLimits {
    lanes: u32,
    scratch_bytes: u64,
    alignment: u32,
}

impl TryFrom<RawLimits> for PlatformLimits {
    type Error = TargetError;

    fn try_from(raw: RawLimits) -> Result<Self, Self::Error> {
        Self::new(raw.lanes, raw.scratch_bytes, raw.alignment)
    }
}

impl From<PlatformLimits> for RawLimits {
    fn from(limits: PlatformLimits) -> Self {
        Self {
            lanes: limits.lane_count,
            scratch_bytes: limits.scratch_bytes_per_lane,
            alignment: limits.alignment_bytes,
        }
    }
}

/// Named target presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Preset {
    /// 48 lanes with 192 KiB scratch each.
    Vector48,
    /// 40 lanes with 192 KiB scratch each.
    Vector40,
    /// 24 lanes with 256 KiB scratch each.
    Vector24,
    /// 8 lanes with 64 KiB scratch each.
    Edge8,
}

impl Preset {
    /// All known presets.
    pub const ALL: [Self; 4] = [Self::Vector48, Self::Vector40, Self::Vector24, Self::Edge8];

    /// Get the name of this preset.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vector48 => "vector-48",
            Self::Vector40 => "vector-40",
            Self::Vector24 => "vector-24",
            Self::Edge8 => "edge-8",
        }
    }

    /// Get the limits of this preset.
    #[must_use]
    pub const fn limits(self) -> PlatformLimits {
        let (lane_count, scratch_bytes_per_lane) = match self {
            Self::Vector48 => (48, 192 * 1024),
            Self::Vector40 => (40, 192 * 1024),
            Self::Vector24 => (24, 256 * 1024),
            Self::Edge8 => (8, 64 * 1024),
        };
        PlatformLimits {
            lane_count,
            scratch_bytes_per_lane,
            alignment_bytes: 32,
        }
    }

    /// Look up a preset by name.
    ///
    /// # Errors
    ///
    /// Returns an error if no preset has this name.
    pub fn from_name(name: &str) -> Result<Self, TargetError> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| TargetError::UnknownPreset(name.to_string()))
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors that can occur when building or parsing platform limits.
#[derive(Debug, Error)]
pub enum TargetError {
    /// Lane count of zero.
    #[error("platform must have at least one lane")]
    NoLanes,
    /// Scratch capacity of zero.
    #[error("platform must have non-empty scratch memory")]
    NoScratch,
    /// Alignment that is not a power of two.
    #[error("alignment must be a power of two, got {0}")]
    BadAlignment(u32),
    /// Unknown preset name.
    #[error("unknown platform preset: {0}")]
    UnknownPreset(String),
    /// Malformed descriptor string.
    #[error("invalid platform descriptor `{descriptor}`: {reason}")]
    InvalidDescriptor {
        /// The descriptor that failed to parse.
        descriptor: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Parse a byte size with an optional `k` or `m` suffix.
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, scale) = match s.as_bytes().last()? {
        b'k' | b'K' => (&s[..s.len() - 1], 1024),
        b'm' | b'M' => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(scale)
}

/// Parse a platform descriptor string into validated limits.
///
/// # Errors
///
/// Returns an error if the descriptor is malformed, misses a key, or the
/// resulting limits are invalid.
pub fn parse_descriptor(descriptor: &str) -> Result<PlatformLimits, TargetError> {
    let invalid = |reason: &str| TargetError::InvalidDescriptor {
        descriptor: descriptor.to_string(),
        reason: reason.to_string(),
    };

    let mut lanes = None;
    let mut scratch = None;
    let mut align = None;

    for part in descriptor.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid("expected key=value"))?;
        match key.trim() {
            "lanes" => {
                lanes = Some(
                    value
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| invalid("lanes is not a number"))?,
                );
            }
            "scratch" => {
                scratch = Some(parse_size(value).ok_or_else(|| invalid("bad scratch size"))?);
            }
            "align" => {
                align = Some(
                    value
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| invalid("align is not a number"))?,
                );
            }
            other => return Err(invalid(&format!("unknown key `{other}`"))),
        }
    }

    let lanes = lanes.ok_or_else(|| invalid("missing lanes"))?;
    let scratch = scratch.ok_or_else(|| invalid("missing scratch"))?;
    let align = align.unwrap_or(32);
    PlatformLimits::new(lanes, scratch, align)
}

/// Resolve a preset name or a descriptor string.
///
/// # Errors
///
/// Returns an error if the input is neither a known preset nor a valid
/// descriptor.
pub fn parse_platform(s: &str) -> Result<PlatformLimits, TargetError> {
    if s.contains('=') {
        parse_descriptor(s)
    } else {
        Preset::from_name(s).map(Preset::limits)
    }
}
