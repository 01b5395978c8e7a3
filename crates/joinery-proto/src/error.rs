//! Protocol error types.

use thiserror::Error;

/// Errors raised while building or decoding load-query IR.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A relation path or order specification is malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}
