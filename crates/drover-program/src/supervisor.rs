//! Launching, tracking and reaping of supervised programs.
//!
//! Programs register in the supervisor by name. Single-run programs
//! reserve their name before the spawn so two racing starts cannot
//! both launch; plural programs register as `command#pid` after the
//! spawn. A watcher thread per program reaps the child, records the
//! exit status, removes the registry entry and then runs the
//! completion hook, under the worker gate unless the program opted
//! out.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use drover_common::{SyncGate, SyncMode};

use crate::errors::{ProgramError, ProgramResult};
use crate::program::{ExitPolicy, Program, RunPolicy};

/// How long [`Supervisor::shutdown`] waits after SIGTERM before
/// escalating to SIGKILL.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(10);

type CompletionHook = Box<dyn Fn(&Handle) + Send + Sync + 'static>;

/// Outcome of [`Handle::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The program exited. The status is `None` when reaping failed.
    Exited(Option<ExitStatus>),
    TimedOut,
}

/// Lifecycle stage reported by [`Handle::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// Spawned, not yet reaped.
    Running,
    /// Reaped with an exit status.
    Done,
    /// The watcher failed to reap the program.
    Error,
}

#[derive(Debug, Default)]
struct Completion {
    done: bool,
    status: Option<ExitStatus>,
}

/// A launched program.
#[derive(Debug)]
pub struct Handle {
    name: String,
    command: String,
    pid: Pid,
    exit_policy: ExitPolicy,
    completion: Mutex<Completion>,
    exited: Condvar,
}

impl Handle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command this handle was launched from.
    pub fn program(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        !self.completion.lock().done
    }

    /// Exit status, once the watcher reaped the program.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.completion.lock().status
    }

    /// Where the program is in its lifecycle.
    pub fn state(&self) -> ProgramState {
        let completion = self.completion.lock();
        if !completion.done {
            ProgramState::Running
        } else if completion.status.is_some() {
            ProgramState::Done
        } else {
            ProgramState::Error
        }
    }

    /// Send `signal`; delivery failures (e.g. already exited) are
    /// ignored.
    pub fn kill(&self, signal: Signal) {
        let _ = signal::kill(self.pid, signal);
    }

    /// Block until the program exits. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut completion = self.completion.lock();
        match timeout {
            None => {
                while !completion.done {
                    self.exited.wait(&mut completion);
                }
                WaitOutcome::Exited(completion.status)
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !completion.done {
                    if self.exited.wait_until(&mut completion, deadline).timed_out() {
                        return WaitOutcome::TimedOut;
                    }
                }
                WaitOutcome::Exited(completion.status)
            }
        }
    }

    fn complete(&self, status: Option<ExitStatus>) {
        let mut completion = self.completion.lock();
        completion.done = true;
        completion.status = status;
        self.exited.notify_all();
    }
}

#[derive(Debug)]
enum Slot {
    /// Name taken by a single-run program that is still spawning.
    Reserved,
    Running(Arc<Handle>),
}

/// Per-worker program registry.
#[derive(Debug)]
pub struct Supervisor {
    gate: Arc<SyncGate>,
    programs: Mutex<HashMap<String, Slot>>,
}

impl Supervisor {
    pub fn new(gate: Arc<SyncGate>) -> Self {
        Self {
            gate,
            programs: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a program.
    pub fn run(self: &Arc<Self>, program: Program) -> ProgramResult<Arc<Handle>> {
        self.launch(program, None)
    }

    /// Launch a program with a completion hook. The hook runs on the
    /// watcher thread after the program was reaped and deregistered,
    /// under the worker gate unless the program asked for async mode.
    pub fn run_with<F>(self: &Arc<Self>, program: Program, at_end: F) -> ProgramResult<Arc<Handle>>
    where
        F: Fn(&Handle) + Send + Sync + 'static,
    {
        self.launch(program, Some(Box::new(at_end)))
    }

    fn launch(
        self: &Arc<Self>,
        program: Program,
        at_end: Option<CompletionHook>,
    ) -> ProgramResult<Arc<Handle>> {
        let single_name = match program.run_policy {
            RunPolicy::Single => {
                let name = program
                    .name
                    .clone()
                    .unwrap_or_else(|| program.command.clone());
                let mut programs = self.programs.lock();
                if programs.contains_key(&name) {
                    return Err(ProgramError::already_running(&name));
                }
                programs.insert(name.clone(), Slot::Reserved);
                Some(name)
            }
            RunPolicy::Plural => None,
        };

        let mut command = Command::new(&program.command);
        command.args(&program.args);
        for (key, value) in &program.env {
            command.env(key, value);
        }
        if let Some(dir) = &program.cwd {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                if let Some(name) = &single_name {
                    self.programs.lock().remove(name);
                }
                return Err(ProgramError::spawn_failed(&program.command, err));
            }
        };

        let pid = Pid::from_raw(child.id() as i32);
        let name = match single_name {
            Some(name) => name,
            None => format!("{}#{}", program.command, pid),
        };
        debug!("run program '{}' pid {}", name, pid);

        let handle = Arc::new(Handle {
            name: name.clone(),
            command: program.command.clone(),
            pid,
            exit_policy: program.exit_policy,
            completion: Mutex::new(Completion::default()),
            exited: Condvar::new(),
        });
        self.programs
            .lock()
            .insert(name, Slot::Running(Arc::clone(&handle)));

        let supervisor = Arc::downgrade(self);
        let gate = Arc::clone(&self.gate);
        let mode = program.sync_mode;
        let watcher_handle = Arc::clone(&handle);
        std::thread::spawn(move || {
            let status = child.wait().ok();
            watcher_handle.complete(status);
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.programs.lock().remove(watcher_handle.name());
            }
            if let Some(at_end) = at_end {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    gate.run(mode, || at_end(&watcher_handle));
                }));
                if outcome.is_err() {
                    error!(
                        "completion hook for '{}' panicked",
                        watcher_handle.program()
                    );
                }
            }
        });

        Ok(handle)
    }

    /// Signal every running instance launched from `command`. Returns
    /// how many were signalled.
    pub fn kill(&self, command: &str, signal: Signal) -> usize {
        let programs = self.programs.lock();
        let mut count = 0;
        for slot in programs.values() {
            if let Slot::Running(handle) = slot {
                if handle.program() == command {
                    handle.kill(signal);
                    count += 1;
                }
            }
        }
        count
    }

    pub fn get(&self, name: &str) -> Option<Arc<Handle>> {
        match self.programs.lock().get(name) {
            Some(Slot::Running(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.programs.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }

    /// Terminate every running program except those marked to stay:
    /// SIGTERM first, then SIGKILL for programs still alive after
    /// `grace`.
    pub fn shutdown(&self, grace: Duration) {
        let handles: Vec<Arc<Handle>> = {
            let programs = self.programs.lock();
            programs
                .values()
                .filter_map(|slot| match slot {
                    Slot::Running(handle) if handle.exit_policy == ExitPolicy::Kill => {
                        Some(Arc::clone(handle))
                    }
                    _ => None,
                })
                .collect()
        };

        for handle in handles {
            handle.kill(Signal::SIGTERM);
            if handle.wait(Some(grace)) == WaitOutcome::TimedOut {
                handle.kill(Signal::SIGKILL);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
