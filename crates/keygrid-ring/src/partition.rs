//! Ring partitioning: boundaries, segments and splits.
//!
//! A tenant resource's keyspace is described by a set of start boundaries.
//! Sorted ascending, boundary `i` owns every position up to (but excluding)
//! boundary `i + 1`; the last boundary wraps around to the first.

use crate::error::{RingError, RingResult};
use crate::{MAX_RING_FANOUT, RING_SIZE};

/// Evenly spaced start boundaries for `count` ranges.
///
/// Boundary `i` is `i32::MIN + i * floor(2^32 / count)`. Exactly `count`
/// values are returned; any remainder of the division goes to the last range.
pub fn split_evenly(count: usize) -> RingResult<Vec<i32>> {
    if count == 0 || count > MAX_RING_FANOUT {
        return Err(RingError::InvalidSplit {
            found: count,
            max: MAX_RING_FANOUT,
        });
    }
    let step = RING_SIZE / count as u64;
    Ok((0..count as u64)
        .map(|i| (i32::MIN as i64 + (i * step) as i64) as i32)
        .collect())
}

/// A contiguous run of ring positions starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: i32,
    /// Number of positions covered, `1..=2^32`.
    pub width: u64,
}

impl Segment {
    /// Whether `hash` falls inside this segment (wrap-aware).
    pub fn contains(&self, hash: i32) -> bool {
        let offset = (hash as u32).wrapping_sub(self.start as u32) as u64;
        offset < self.width
    }

    /// The position halfway through the segment.
    pub fn midpoint(&self) -> i32 {
        (self.start as u32).wrapping_add((self.width / 2) as u32) as i32
    }

    /// Last position covered by the segment.
    pub fn end_inclusive(&self) -> i32 {
        (self.start as u32).wrapping_add((self.width - 1) as u32) as i32
    }
}

/// Segments for a set of boundaries, ordered by start.
///
/// Duplicate boundaries are collapsed. The widths of the result always sum
/// to 2^32 when at least one boundary is given.
pub fn segments(boundaries: &[i32]) -> Vec<Segment> {
    let mut sorted = boundaries.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let Some((&first, _)) = sorted.split_first() else {
        return Vec::new();
    };
    let last = sorted[sorted.len() - 1];

    let mut out: Vec<Segment> = sorted
        .windows(2)
        .map(|pair| Segment {
            start: pair[0],
            width: (pair[1] as i64 - pair[0] as i64) as u64,
        })
        .collect();
    out.push(Segment {
        start: last,
        width: RING_SIZE - (last as i64 - first as i64) as u64,
    });
    out
}

/// The widest segment; ties go to the segment with the lowest start.
pub fn widest_segment(boundaries: &[i32]) -> Option<Segment> {
    segments(boundaries)
        .into_iter()
        .fold(None, |best: Option<Segment>, seg| match best {
            Some(b) if b.width >= seg.width => Some(b),
            _ => Some(seg),
        })
}
