//! Probe modes and recorded probe arrays.
//!
//! Three modes trade recording cost against detail: `Exists` records a
//! boolean per probe, `Count` a saturating execution count, and
//! `ParallelCount` a pair of counts per probe so that executions under a
//! monitor can be tallied exactly while unsynchronized executions stay on
//! the cheap racy path.

use serde::{Deserialize, Serialize};

use crate::result::{SondaError, SondaResult};

/// How instrumented code records probe hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeMode {
    /// Hit-or-not flags
    Exists,
    /// Saturating execution counts
    Count,
    /// Counts split into a racy primary and a lock-protected parallel slot
    ParallelCount,
}

impl ProbeMode {
    /// Wire tag identifying the mode in serialized probe data.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Exists => 1,
            Self::Count => 2,
            Self::ParallelCount => 3,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> SondaResult<Self> {
        match tag {
            1 => Ok(Self::Exists),
            2 => Ok(Self::Count),
            3 => Ok(Self::ParallelCount),
            _ => Err(SondaError::UnknownProbeMode { tag }),
        }
    }

    /// Descriptor of the synthetic probe field for this mode.
    #[must_use]
    pub const fn field_desc(self) -> &'static str {
        match self {
            Self::Exists => "[Z",
            Self::Count => "Lsonda/rt/CountProbes;",
            Self::ParallelCount => "Lsonda/rt/ParallelProbes;",
        }
    }

    /// Operand-stack slots one probe hit needs on top of the probe
    /// reference already loaded: `Exists` stores array/index/value,
    /// counting modes call `increment(index)` on the holder.
    #[must_use]
    pub const fn probe_stack_size(self) -> u16 {
        match self {
            Self::Exists => 3,
            Self::Count | Self::ParallelCount => 2,
        }
    }

    /// True for the modes that count rather than flag.
    #[must_use]
    pub const fn is_counting(self) -> bool {
        !matches!(self, Self::Exists)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Count => "count",
            Self::ParallelCount => "parallelcount",
        }
    }
}

/// Recorded probe values for one unit, in one of the three modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeArray {
    Exists(Vec<bool>),
    Count(Vec<u32>),
    ParallelCount {
        /// Racy per-probe counts written outside any monitor
        primary: Vec<u32>,
        /// Exact per-probe counts written while a monitor is held
        parallel: Vec<u32>,
    },
}

impl ProbeArray {
    /// A zeroed array of `len` probes in `mode`.
    #[must_use]
    pub fn new(mode: ProbeMode, len: usize) -> Self {
        match mode {
            ProbeMode::Exists => Self::Exists(vec![false; len]),
            ProbeMode::Count => Self::Count(vec![0; len]),
            ProbeMode::ParallelCount => Self::ParallelCount {
                primary: vec![0; len],
                parallel: vec![0; len],
            },
        }
    }

    #[must_use]
    pub const fn mode(&self) -> ProbeMode {
        match self {
            Self::Exists(_) => ProbeMode::Exists,
            Self::Count(_) => ProbeMode::Count,
            Self::ParallelCount { .. } => ProbeMode::ParallelCount,
        }
    }

    /// Number of probes recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Exists(v) => v.len(),
            Self::Count(v) => v.len(),
            Self::ParallelCount { primary, .. } => primary.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether probe `index` was hit at least once. Out-of-range probes
    /// read as not covered.
    #[must_use]
    pub fn is_covered(&self, index: usize) -> bool {
        match self {
            Self::Exists(v) => v.get(index).copied().unwrap_or(false),
            Self::Count(v) => v.get(index).copied().unwrap_or(0) > 0,
            Self::ParallelCount { primary, parallel } => {
                primary.get(index).copied().unwrap_or(0) > 0
                    || parallel.get(index).copied().unwrap_or(0) > 0
            }
        }
    }

    /// Total recorded executions of probe `index`, saturating.
    #[must_use]
    pub fn hit_count(&self, index: usize) -> u32 {
        match self {
            Self::Exists(v) => u32::from(v.get(index).copied().unwrap_or(false)),
            Self::Count(v) => v.get(index).copied().unwrap_or(0),
            Self::ParallelCount { primary, parallel } => primary
                .get(index)
                .copied()
                .unwrap_or(0)
                .saturating_add(parallel.get(index).copied().unwrap_or(0)),
        }
    }

    /// Marks a probe hit, used when replaying recorded data.
    pub fn record(&mut self, index: usize) {
        match self {
            Self::Exists(v) => {
                if let Some(slot) = v.get_mut(index) {
                    *slot = true;
                }
            }
            Self::Count(v) | Self::ParallelCount { primary: v, .. } => {
                if let Some(slot) = v.get_mut(index) {
                    *slot = slot.saturating_add(1);
                }
            }
        }
    }

    /// Merges `other` into `self`: flags OR, counts saturating-add.
    ///
    /// Mode and length must match; `name` only feeds the error message.
    pub fn merge(&mut self, other: &Self, name: &str) -> SondaResult<()> {
        if self.mode() != other.mode() {
            return Err(SondaError::ProbeModeMismatch {
                expected: self.mode().name().to_string(),
                actual: other.mode().name().to_string(),
            });
        }
        if self.len() != other.len() {
            return Err(SondaError::IncompatibleData {
                name: name.to_string(),
                reason: format!("probe count {} vs {}", self.len(), other.len()),
            });
        }
        match (self, other) {
            (Self::Exists(a), Self::Exists(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x |= *y;
                }
            }
            (Self::Count(a), Self::Count(b)) => {
                for (x, y) in a.iter_mut().zip(b) {
                    *x = x.saturating_add(*y);
                }
            }
            (
                Self::ParallelCount { primary: ap, parallel: al },
                Self::ParallelCount { primary: bp, parallel: bl },
            ) => {
                for (x, y) in ap.iter_mut().zip(bp) {
                    *x = x.saturating_add(*y);
                }
                for (x, y) in al.iter_mut().zip(bl) {
                    *x = x.saturating_add(*y);
                }
            }
            _ => unreachable!("mode checked above"),
        }
        Ok(())
    }

    /// Clears all recorded values in place.
    pub fn reset(&mut self) {
        match self {
            Self::Exists(v) => v.fill(false),
            Self::Count(v) => v.fill(0),
            Self::ParallelCount { primary, parallel } => {
                primary.fill(0);
                parallel.fill(0);
            }
        }
    }

    /// Serializes as: mode tag, varint length, then flags packed eight to a
    /// byte or varint counts.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.mode().tag()];
        write_varint(&mut out, self.len() as u64);
        match self {
            Self::Exists(v) => write_packed_bools(&mut out, v),
            Self::Count(v) => {
                for &c in v {
                    write_varint(&mut out, u64::from(c));
                }
            }
            Self::ParallelCount { primary, parallel } => {
                for &c in primary {
                    write_varint(&mut out, u64::from(c));
                }
                for &c in parallel {
                    write_varint(&mut out, u64::from(c));
                }
            }
        }
        out
    }

    /// Inverse of [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> SondaResult<Self> {
        let mut pos = 0;
        let tag = *bytes
            .first()
            .ok_or_else(|| SondaError::malformed("empty probe data"))?;
        pos += 1;
        let mode = ProbeMode::from_tag(tag)?;
        let len = read_varint(bytes, &mut pos)? as usize;
        let array = match mode {
            ProbeMode::Exists => Self::Exists(read_packed_bools(bytes, &mut pos, len)?),
            ProbeMode::Count => Self::Count(read_counts(bytes, &mut pos, len)?),
            ProbeMode::ParallelCount => Self::ParallelCount {
                primary: read_counts(bytes, &mut pos, len)?,
                parallel: read_counts(bytes, &mut pos, len)?,
            },
        };
        if pos != bytes.len() {
            return Err(SondaError::malformed("trailing bytes after probe data"));
        }
        Ok(array)
    }
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> SondaResult<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| SondaError::malformed("truncated varint"))?;
        *pos += 1;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(SondaError::malformed("varint too long"))
}

fn write_packed_bools(out: &mut Vec<u8>, flags: &[bool]) {
    for chunk in flags.chunks(8) {
        let mut byte = 0u8;
        for (i, &f) in chunk.iter().enumerate() {
            if f {
                byte |= 1 << i;
            }
        }
        out.push(byte);
    }
}

fn read_packed_bools(bytes: &[u8], pos: &mut usize, len: usize) -> SondaResult<Vec<bool>> {
    let byte_count = len.div_ceil(8);
    let end = pos
        .checked_add(byte_count)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| SondaError::malformed("truncated probe flags"))?;
    let mut flags = Vec::with_capacity(len);
    for i in 0..len {
        let byte = bytes[*pos + i / 8];
        flags.push(byte & (1 << (i % 8)) != 0);
    }
    *pos = end;
    Ok(flags)
}

fn read_counts(bytes: &[u8], pos: &mut usize, len: usize) -> SondaResult<Vec<u32>> {
    let mut counts = Vec::with_capacity(len.min(65_536));
    for _ in 0..len {
        let v = read_varint(bytes, pos)?;
        counts.push(u32::try_from(v).unwrap_or(u32::MAX));
    }
    Ok(counts)
}
