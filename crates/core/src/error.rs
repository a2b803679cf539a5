//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid check interval '{value}': {reason}")]
    InvalidInterval { value: String, reason: String },

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("resource type '{0}' has no known version")]
    ResourceTypeVersionUnknown(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
