//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Payload is not valid structured text
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Payload parsed but is not an object or batch envelope
    #[error("payload is not an envelope (found {0})")]
    NotEnvelope(&'static str),
}
