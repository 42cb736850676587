//! Error types for state persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for state operations
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised while saving or loading a state snapshot
#[derive(Error, Debug)]
pub enum StateError {
    #[error("snapshot not found: {}", path.display())]
    SnapshotMissing { path: PathBuf },

    #[error("snapshot digest mismatch: {}", path.display())]
    DigestMismatch { path: PathBuf },

    #[error("snapshot malformed: {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StateError {
    pub fn snapshot_missing(path: impl Into<PathBuf>) -> Self {
        StateError::SnapshotMissing { path: path.into() }
    }

    pub fn digest_mismatch(path: impl Into<PathBuf>) -> Self {
        StateError::DigestMismatch { path: path.into() }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StateError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error just means "nothing saved yet".
    pub fn is_missing(&self) -> bool {
        matches!(self, StateError::SnapshotMissing { .. })
    }
}
