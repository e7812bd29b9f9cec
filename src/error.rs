//! Error taxonomy for sync runs.
//!
//! Listing failures abort a run, extraction failures degrade to raw naming,
//! write failures fail a single file and refresh failures are only reported.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type used across the sync engine.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote source unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("remote path not found: {0}")]
    RemoteNotFound(String),

    #[error("remote source rejected credentials: {0}")]
    RemoteAuth(String),

    #[error("name extraction returned malformed output: {0}")]
    ExtractionMalformed(String),

    #[error("name extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),

    #[error("name extraction service unavailable: {0}")]
    ExtractionUnavailable(String),

    #[error("failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refresh of {target} failed: {message}")]
    RefreshFailure { target: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task {0} is already running")]
    AlreadyRunning(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("task {0} is inactive")]
    TaskInactive(String),

    #[error("task state error: {0}")]
    State(String),

    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }

    pub fn refresh(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RefreshFailure {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transport-level failures worth another attempt. Everything else is
    /// deterministic and retrying would only repeat it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_) | Self::ExtractionTimeout(_) | Self::ExtractionUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_variants() {
        assert!(SyncError::RemoteUnavailable("reset".into()).is_retryable());
        assert!(SyncError::ExtractionTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!SyncError::RemoteNotFound("/gone".into()).is_retryable());
        assert!(!SyncError::RemoteAuth("401".into()).is_retryable());
        assert!(!SyncError::ExtractionMalformed("{".into()).is_retryable());
    }

    #[test]
    fn test_write_failure_message() {
        let err = SyncError::write(
            "/out/a.strm",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "failed to write /out/a.strm: denied");
    }
}
