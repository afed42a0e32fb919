//! Ring placement: maps an entry key to its replica positions.

use tracing::trace;
use xxhash_rust::xxh32::xxh32;

use crate::error::{RingError, RingResult};
use crate::{MAX_RING_FANOUT, RING_SIZE};

/// Hash a key onto the ring.
///
/// 32-bit xxHash (seed 0) over the UTF-8 bytes, reinterpreted as `i32`.
pub fn hash_key(key: &str) -> i32 {
    xxh32(key.as_bytes(), 0) as i32
}

/// The placement of one key: its own hash plus every replica position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingEntry {
    pub id: String,
    pub hash: i32,
    /// Replica positions in generation order. `locations[0] == hash`.
    pub locations: Vec<i32>,
}

/// Offsets added to a key's hash to derive its replica positions.
///
/// Offset `k` is `k * floor(2^32 / n)`, so replicas land evenly around
/// the ring.
pub fn replication_offsets(replication_factor: usize) -> RingResult<Vec<u32>> {
    if replication_factor == 0 || replication_factor > MAX_RING_FANOUT {
        return Err(RingError::InvalidReplicationFactor {
            found: replication_factor,
            max: MAX_RING_FANOUT,
        });
    }
    let step = RING_SIZE / replication_factor as u64;
    Ok((0..replication_factor as u64)
        .map(|k| (k * step) as u32)
        .collect())
}

/// Stateless ring placement engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingEngine;

impl RingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute the replica positions for `key`.
    ///
    /// The same key always yields the same positions. A position equal to
    /// an earlier one is dropped, so the result may hold fewer than
    /// `replication_factor` entries; callers must not treat that as an error.
    pub fn locate(&self, key: &str, replication_factor: usize) -> RingResult<RingEntry> {
        let offsets = replication_offsets(replication_factor)?;
        let hash = hash_key(key);

        let mut locations = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let position = (hash as u32).wrapping_add(offset) as i32;
            if !locations.contains(&position) {
                locations.push(position);
            }
        }

        trace!(%key, hash, ?locations, "ring entry located");
        Ok(RingEntry {
            id: key.to_string(),
            hash,
            locations,
        })
    }
}
