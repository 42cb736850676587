//! Error types for program supervision.

use thiserror::Error;

/// Result alias for program operations
pub type ProgramResult<T> = Result<T, ProgramError>;

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("program '{name}' is already running")]
    AlreadyRunning { name: String },

    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProgramError {
    pub fn already_running(name: impl Into<String>) -> Self {
        ProgramError::AlreadyRunning { name: name.into() }
    }

    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        ProgramError::SpawnFailed {
            program: program.into(),
            source,
        }
    }
}
