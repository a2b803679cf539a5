//! Scanner error types.

use lookout_metadata::MetadataError;
use thiserror::Error;

/// Failure of a checker, as reported by the check provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    /// The resource's check script ran and exited non-zero.
    #[error("resource script '{script}' failed: exit status {exit_status}\n\nstderr:\n{stderr}")]
    ScriptFailed {
        script: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl CheckError {
    pub fn is_script_failure(&self) -> bool {
        matches!(self, Self::ScriptFailed { .. })
    }

    /// Label value for the failed-checks metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScriptFailed { .. } => "script",
            Self::Internal(_) => "internal",
        }
    }
}

/// Errors returned by scanner entry points.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    /// Another holder has the checking lease. Routine; back off and retry.
    #[error("failed to acquire checking lock")]
    FailedToAcquireLock,

    #[error("{0}")]
    InvalidInterval(lookout_core::Error),

    #[error("resource type '{0}' has no known version")]
    ResourceTypeVersionUnknown(String),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Core(lookout_core::Error),

    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn is_script_failure(&self) -> bool {
        matches!(self, Self::Check(err) if err.is_script_failure())
    }
}

impl From<lookout_core::Error> for ScanError {
    fn from(e: lookout_core::Error) -> Self {
        match e {
            lookout_core::Error::InvalidInterval { .. } => Self::InvalidInterval(e),
            lookout_core::Error::ResourceTypeVersionUnknown(name) => {
                Self::ResourceTypeVersionUnknown(name)
            }
            other => Self::Core(other),
        }
    }
}

/// Result type for scanner operations.
pub type ScanResult<T> = std::result::Result<T, ScanError>;
