//! Keyed shared state for drover workers.
//!
//! This crate provides:
//! - The in-memory key/value store shared by every part of a worker
//!   ([`SharedState`])
//! - Key selection for bulk reads ([`Selector`])
//! - Snapshot persistence with backup rotation and digest verification
//!   ([`Snapshot`])

pub mod errors;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use errors::{StateError, StateResult};
pub use snapshot::Snapshot;
pub use store::{Selector, SharedState};
