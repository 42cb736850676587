//! One-shot and periodic timers for drover workers.
//!
//! Each timer runs its callback on a dedicated thread, by default under
//! the worker's [`SyncGate`] so fires are serialized with command
//! handlers and other callbacks. Stopping is cooperative: the flag is
//! checked right before a fire, so a sleeping timer thread winds down
//! at its next deadline without firing.
//!
//! A stopped or completed timer can be started again; each start gets
//! its own stop flag, so a stale thread from an earlier run can never
//! stop a later one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::error;

use drover_common::{SyncGate, SyncMode};

/// Result alias for timer operations
pub type TimerResult<T> = Result<T, TimerError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    OnceAfter(Duration),
    OnceAt(SystemTime),
    Every(Duration),
}

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    stop: Option<Arc<AtomicBool>>,
}

/// A timer bound to one worker's gate.
#[derive(Debug)]
pub struct Timer {
    schedule: Schedule,
    mode: SyncMode,
    gate: Arc<SyncGate>,
    inner: Arc<Mutex<Inner>>,
}

impl Timer {
    /// Fire once, `delay` from start.
    pub fn singleshot(delay: Duration, gate: Arc<SyncGate>) -> Self {
        Self::with_schedule(Schedule::OnceAfter(delay), gate)
    }

    /// Fire once at `deadline`; a deadline already in the past fires
    /// immediately.
    pub fn singleshot_at(deadline: SystemTime, gate: Arc<SyncGate>) -> Self {
        Self::with_schedule(Schedule::OnceAt(deadline), gate)
    }

    /// Fire every `interval`, measured from the start of the run so
    /// individual fires do not drift. A stalled timer (fires taking
    /// longer than the interval) re-anchors instead of bursting to
    /// catch up.
    pub fn periodic(interval: Duration, gate: Arc<SyncGate>) -> Self {
        Self::with_schedule(Schedule::Every(interval), gate)
    }

    fn with_schedule(schedule: Schedule, gate: Arc<SyncGate>) -> Self {
        Self {
            schedule,
            mode: SyncMode::Sync,
            gate,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Run the callback outside the gate instead of under it.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Whether a run is active. One-shot timers clear this after
    /// firing.
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Start the timer thread. Fails if this timer is already running.
    ///
    /// A panicking callback is caught and logged; a periodic timer
    /// keeps its schedule afterwards.
    pub fn start<F>(&self, callback: F) -> TimerResult<()>
    where
        F: Fn() + Send + 'static,
    {
        let stop = {
            let mut inner = self.inner.lock();
            if inner.running {
                return Err(TimerError::AlreadyRunning);
            }
            let stop = Arc::new(AtomicBool::new(false));
            inner.running = true;
            inner.stop = Some(Arc::clone(&stop));
            stop
        };

        let schedule = self.schedule;
        let mode = self.mode;
        let gate = Arc::clone(&self.gate);
        let inner = Arc::clone(&self.inner);

        std::thread::spawn(move || match schedule {
            Schedule::OnceAfter(delay) => {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                run_once(&inner, &stop, &gate, mode, &callback);
            }
            Schedule::OnceAt(deadline) => {
                if let Ok(delay) = deadline.duration_since(SystemTime::now()) {
                    std::thread::sleep(delay);
                }
                run_once(&inner, &stop, &gate, mode, &callback);
            }
            Schedule::Every(interval) => {
                let mut timeup = Instant::now();
                loop {
                    timeup += interval;
                    let now = Instant::now();
                    if timeup > now {
                        std::thread::sleep(timeup - now);
                    } else {
                        timeup = now;
                        std::thread::yield_now();
                    }
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    fire(&gate, mode, &callback);
                }
            }
        });

        Ok(())
    }

    /// Ask the current run to wind down. The timer counts as stopped
    /// right away and may be started again before the old thread has
    /// reached its next deadline.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(stop) = inner.stop.as_ref() {
            stop.store(true, Ordering::SeqCst);
        }
        inner.running = false;
    }
}

fn run_once<F: Fn()>(
    inner: &Arc<Mutex<Inner>>,
    stop: &Arc<AtomicBool>,
    gate: &SyncGate,
    mode: SyncMode,
    callback: &F,
) {
    if !stop.load(Ordering::SeqCst) {
        fire(gate, mode, callback);
    }
    let mut inner = inner.lock();
    // Only clear the flag if no newer run has replaced this one.
    let current = inner
        .stop
        .as_ref()
        .map_or(false, |token| Arc::ptr_eq(token, stop));
    if current {
        inner.running = false;
    }
}

fn fire<F: Fn()>(gate: &SyncGate, mode: SyncMode, callback: &F) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        gate.run(mode, callback);
    }));
    if outcome.is_err() {
        error!("timer callback panicked");
    }
}

// ============================================================================
// Tests
// ============================================================================
