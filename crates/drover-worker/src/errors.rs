//! Error types for event dispatch and worker bootstrap.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code used when the worker cannot finish booting (bad pid file,
/// failed privilege drop, setup hook failure after daemonizing).
pub const BOOTSTRAP_EXIT_CODE: i32 = 64;

/// Errors raised while routing an event through the state machine.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No handler is registered for the current state and event.
    #[error("No action defined. state: {state}, event: {event}")]
    NoHandler { state: String, event: String },

    /// A handler ran and reported a failure of its own.
    #[error("Event handler failed: {reason}")]
    HandlerFailed { reason: String },
}

impl DispatchError {
    pub fn no_handler(state: impl Into<String>, event: impl Into<String>) -> Self {
        DispatchError::NoHandler {
            state: state.into(),
            event: event.into(),
        }
    }

    pub fn handler_failed(reason: impl Into<String>) -> Self {
        DispatchError::HandlerFailed {
            reason: reason.into(),
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors raised while bringing a worker process up.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The privilege user given in the config does not exist.
    #[error("Unknown user '{user}'")]
    UnknownUser { user: String },

    /// Switching to the privilege user failed.
    #[error("Failed to switch to user '{user}': {source}")]
    Privilege { user: String, source: nix::Error },

    /// The pid file path points at a directory.
    #[error("Pid file '{}' is a directory", path.display())]
    PidFileIsDirectory { path: PathBuf },

    /// Another worker instance already holds the pid file.
    #[error("Still working. Pid file '{}' exists", path.display())]
    StillWorking { path: PathBuf },

    /// Forking into the background failed.
    #[error("Daemonize failed: {0}")]
    Daemonize(nix::Error),

    /// The application setup hook reported an error.
    #[error("Setup failed: {0}")]
    Setup(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootstrapError {
    pub fn unknown_user(user: impl Into<String>) -> Self {
        BootstrapError::UnknownUser { user: user.into() }
    }

    pub fn privilege(user: impl Into<String>, source: nix::Error) -> Self {
        BootstrapError::Privilege {
            user: user.into(),
            source,
        }
    }

    pub fn setup<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BootstrapError::Setup(Box::new(source))
    }
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;

// ========================================================================
// Tests
// ========================================================================
