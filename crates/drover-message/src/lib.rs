//! Messaging between worker threads.
//!
//! This crate provides:
//! - One-to-many wakeups between threads ([`Broadcast`])
//! - A bounded, monotonically numbered message queue that lets
//!   intermittent consumers detect loss instead of silently skipping
//!   messages ([`NumberedQueue`])

pub mod broadcast;
pub mod queue;

// Re-export commonly used types
pub use broadcast::{Broadcast, Waiter};
pub use queue::{Message, NumberedQueue, DEFAULT_QUEUE_SIZE};
