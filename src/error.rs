//! Error handling module for the bundle engine
//!
//! Provides centralized error handling with proper error types using thiserror.
//! All errors in the engine should use these types for consistency.
//!
//! Error semantics:
//! - `Validation` and `NotFound` are fatal preconditions: nothing has been
//!   written to the vault when they are raised.
//! - `Io` and `Json` propagate unchanged; there is no automatic retry.
//! - A non-zero exit from an entrypoint or verification script is NOT an
//!   error. It is a recorded outcome (`status=fail` in the receipt).

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the bundle engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// IO errors (file operations, subprocess spawn, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or archive structural validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown bundle id, missing stored archive, missing entrypoint
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive read/extract errors (corrupt tar, bad gzip stream)
    #[error("Archive error in {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// Vault layout errors (unresolvable root, unwritable store dir)
    #[error("Vault error: {0}")]
    Vault(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for bundle engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

// Convenient error constructors
impl EngineError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an archive error
    pub fn archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Archive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a vault error
    pub fn vault(msg: impl Into<String>) -> Self {
        Self::Vault(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::validation("bundle_id missing/invalid");
        assert_eq!(
            err.to_string(),
            "Validation error: bundle_id missing/invalid"
        );

        let err = EngineError::not_found("bundle not in vault: demo-1");
        assert_eq!(err.to_string(), "Not found: bundle not in vault: demo-1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn test_archive_error_carries_path() {
        let err = EngineError::archive("/tmp/b.tar.gz", "truncated gzip stream");
        assert!(err.to_string().contains("/tmp/b.tar.gz"));
        assert!(err.to_string().contains("truncated gzip stream"));
    }
}
