//! Child process supervision for drover workers.
//!
//! This crate provides:
//! - A builder describing a program to run ([`Program`])
//! - The per-worker registry that launches programs, reaps them on a
//!   watcher thread and runs completion hooks under the worker's gate
//!   ([`Supervisor`])
//! - A handle to a launched program for signalling and waiting
//!   ([`Handle`])

pub mod errors;
pub mod program;
pub mod supervisor;

// Re-export commonly used types
pub use errors::{ProgramError, ProgramResult};
pub use program::{ExitPolicy, Program, RunPolicy};
pub use supervisor::{Handle, ProgramState, Supervisor, WaitOutcome, DEFAULT_EXIT_GRACE};

// Callers signal through the same type the supervisor uses.
pub use nix::sys::signal::Signal;
