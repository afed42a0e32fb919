//! keygrid-ring: the hash ring that places tenant entries on nodes.
//!
//! The ring is the full signed 32-bit integer space. Entry keys are hashed
//! onto it with 32-bit xxHash; a replication factor `N` spreads `N`
//! positions evenly around the ring starting at the key's own hash.
//!
//! # Components
//!
//! - [`RingEngine`]: `locate(key, N)`, the pure placement function.
//! - [`partition`]: even boundary splits for new tenant resources and the
//!   segment arithmetic used to reason about coverage and rebalancing.
//!
//! Nothing in this crate performs I/O.

pub mod engine;
pub mod error;
pub mod partition;

pub use engine::{RingEngine, RingEntry, hash_key, replication_offsets};
pub use error::{RingError, RingResult};
pub use partition::{Segment, segments, split_evenly, widest_segment};

/// Total number of positions on the ring (2^32).
pub const RING_SIZE: u64 = 1 << 32;

/// Upper bound accepted for replication factors and split counts.
pub const MAX_RING_FANOUT: usize = 1024;
