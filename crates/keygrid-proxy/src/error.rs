//! Error types for the routing proxy.

use thiserror::Error;

use keygrid_propagation::PropagationError;
use keygrid_ring::RingError;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No published tenant view for the tenant resource.
    #[error("{0} not found")]
    NotFound(String),

    /// No boundary at or below the ring position.
    #[error("no node owns ring position {hash}")]
    Unroutable { hash: i32 },

    /// A storage node failed to serve a request.
    #[error("node {node_uuid} failed: {message}")]
    Node { node_uuid: String, message: String },

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

impl ProxyError {
    pub fn node(node_uuid: &str, message: impl Into<String>) -> Self {
        ProxyError::Node {
            node_uuid: node_uuid.to_string(),
            message: message.into(),
        }
    }
}
