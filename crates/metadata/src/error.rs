//! Metadata store error types.

use lookout_core::ResourceUser;
use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A concurrent writer or collector won a race; re-run the whole operation.
    #[error("conflict, retry the operation: {0}")]
    RetryableConflict(String),

    /// The entity recording a usage edge no longer exists.
    #[error("user disappeared: {0}")]
    UserDisappeared(ResourceUser),

    #[error("base resource type not found: {0}")]
    BaseResourceTypeNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether the failed operation should be re-run from the start.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableConflict(_))
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<lookout_core::Error> for MetadataError {
    fn from(e: lookout_core::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(MetadataError::RetryableConflict("race".to_string()).is_retryable());
        assert!(!MetadataError::UserDisappeared(ResourceUser::Build(1)).is_retryable());
        assert!(!MetadataError::BaseResourceTypeNotFound("git".to_string()).is_retryable());
        assert!(!MetadataError::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_user_disappeared_message() {
        let err = MetadataError::UserDisappeared(ResourceUser::Resource(42));
        assert_eq!(err.to_string(), "user disappeared: resource 42");
    }
}
