//! Error types for configuration propagation.

use thiserror::Error;

pub type PropagationResult<T> = Result<T, PropagationError>;

#[derive(Debug, Error)]
pub enum PropagationError {
    /// I/O or transport fault talking to the external store.
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("failed to decode value of {key}: {message}")]
    Deserialize { key: String, message: String },

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("watch error: {0}")]
    Watch(String),
}
