//! Error types for the node side.

use thiserror::Error;

use keygrid_control::ControlError;
use keygrid_propagation::PropagationError;

pub type NodeResult<T> = Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    /// The tenant table does not exist locally or is tombstoned.
    #[error("tenant table {0} is not provisioned")]
    NotProvisioned(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("watcher for node {0} is already running")]
    AlreadyStarted(String),

    #[error(transparent)]
    ControlPlane(#[from] ControlError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}
