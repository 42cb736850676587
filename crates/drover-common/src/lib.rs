//! Shared primitives for the drover worker runtime.
//!
//! This crate provides:
//! - The worker-wide serialization lock ([`SyncGate`])
//! - The sync/async execution mode carried by timers, programs and
//!   command handlers ([`SyncMode`])

pub mod sync;

// Re-export commonly used types
pub use sync::{SyncGate, SyncGuard, SyncMode};
