//! Error types for ring computations.

use thiserror::Error;

/// Result type alias for ring operations.
pub type RingResult<T> = Result<T, RingError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("replication factor must be between 1 and {max}, got {found}")]
    InvalidReplicationFactor { found: usize, max: usize },

    #[error("cannot split the ring into {found} ranges (allowed 1..={max})")]
    InvalidSplit { found: usize, max: usize },
}
