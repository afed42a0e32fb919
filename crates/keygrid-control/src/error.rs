//! Error types for control-plane operations.

use thiserror::Error;

use keygrid_propagation::PropagationError;
use keygrid_ring::RingError;
use keygrid_state::{InvalidIdentifier, StateError};

pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Unknown node, tenant resource or node range.
    #[error("{0} not found")]
    NotFound(String),

    #[error("not enough available nodes: required {required}, available {available}")]
    NotEnoughNodes { required: usize, available: usize },

    #[error("node {0} is banned")]
    BannedNode(String),

    /// The operation does not apply to the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

impl From<InvalidIdentifier> for ControlError {
    fn from(value: InvalidIdentifier) -> Self {
        ControlError::InvalidRequest(value.to_string())
    }
}
