//! IPC server errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    /// The socket file is bound by a live server.
    #[error("IPC socket file '{}' was already in use.", path.display())]
    AlreadyInUse { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpcError {
    pub fn already_in_use(path: impl Into<PathBuf>) -> Self {
        IpcError::AlreadyInUse { path: path.into() }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;

// ========================================================================
// Tests
// ========================================================================
