//! Worker runtime.
//!
//! A worker is a long-running daemon built around three pieces: a
//! [`SharedState`] value store, an event-driven [`Machine`], and a
//! [`Supervisor`](drover_program::Supervisor) for child processes.
//! [`Runner`] boots the assembled worker into a daemon with pid file,
//! log file and signal handling.
//!
//! [`SharedState`]: drover_state::SharedState

pub mod errors;
pub mod lifecycle;
pub mod machine;
pub mod worker;

pub use errors::{
    BootstrapError, BootstrapResult, DispatchError, DispatchResult, BOOTSTRAP_EXIT_CODE,
};
pub use lifecycle::{RunMode, Runner};
pub use machine::{noop, EventHandler, Machine};
pub use worker::{Worker, WorkerConfig, DEFAULT_NAME, DEFAULT_WORKDIR};
