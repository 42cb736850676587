//! Worker-wide callback serialization.
//!
//! A worker owns exactly one [`SyncGate`]. Synchronous command handlers,
//! timer fires and program completion hooks all take it before they run,
//! so none of them ever observes another one mid-update. Callbacks that
//! opt out with [`SyncMode::Async`] run without the gate and must do
//! their own locking.

use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Guard returned by [`SyncGate::lock`].
pub type SyncGuard<'a> = MutexGuard<'a, ()>;

/// Whether a callback runs under the worker-wide serialization gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Hold the [`SyncGate`] for the duration of the callback.
    #[default]
    Sync,
    /// Run without taking the gate.
    Async,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Sync => "sync",
            SyncMode::Async => "async",
        }
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, SyncMode::Sync)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The worker-wide serialization lock.
///
/// The gate carries no data of its own. It exists so that independently
/// scheduled callbacks (connection handlers, timers, child-exit hooks)
/// can be serialized against each other without sharing a lock with the
/// state they touch.
#[derive(Debug, Default)]
pub struct SyncGate {
    inner: Mutex<()>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Block until the gate is free, then hold it until the guard drops.
    pub fn lock(&self) -> SyncGuard<'_> {
        self.inner.lock()
    }

    /// Run `f`, holding the gate if `mode` is [`SyncMode::Sync`].
    pub fn run<R>(&self, mode: SyncMode, f: impl FnOnce() -> R) -> R {
        match mode {
            SyncMode::Sync => {
                let _guard = self.inner.lock();
                f()
            }
            SyncMode::Async => f(),
        }
    }

    /// Whether some callback currently holds the gate.
    ///
    /// Only a snapshot; the gate may change hands immediately after.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

// ============================================================================
// Tests
// ============================================================================
