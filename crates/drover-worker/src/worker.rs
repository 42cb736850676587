//! The worker object: shared values, state machine, child process
//! supervision and cleanup, wired together behind one handle.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use drover_common::SyncGate;
use drover_program::{Supervisor, DEFAULT_EXIT_GRACE};
use drover_state::{SharedState, Snapshot, StateResult};

use crate::machine::Machine;

/// Worker name when the config does not give one.
pub const DEFAULT_NAME: &str = "drover";

/// Directory for pid files, sockets, logs and snapshots when the config
/// does not give one.
pub const DEFAULT_WORKDIR: &str = "/tmp";

/// Startup configuration for a worker.
///
/// Only `name` and `workdir` matter to the worker itself; the rest is
/// consumed by the bootstrap in [`crate::lifecycle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker name, used for the pid file, log file, socket and
    /// snapshot names.
    pub name: String,
    /// Directory the runtime files live in.
    pub workdir: PathBuf,
    /// Overrides the derived `<workdir>/<name>.pid` path.
    pub pid_file: Option<PathBuf>,
    /// Overrides the derived `<workdir>/<name>.log` path.
    pub log_file: Option<PathBuf>,
    /// User to switch to before opening any files.
    pub privilege: Option<String>,
    /// Log at debug level instead of info.
    pub debug: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: DEFAULT_NAME.to_string(),
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            pid_file: None,
            log_file: None,
            privilege: None,
            debug: false,
        }
    }
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        WorkerConfig {
            name: name.into(),
            ..WorkerConfig::default()
        }
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = dir.into();
        self
    }

    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn privilege(mut self, user: impl Into<String>) -> Self {
        self.privilege = Some(user.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Effective pid file path.
    pub fn pid_path(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| self.workdir.join(format!("{}.pid", self.name)))
    }

    /// Effective log file path.
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.workdir.join(format!("{}.log", self.name)))
    }

    /// Default IPC socket path: `<workdir>/<name>`, no extension.
    pub fn socket_path(&self) -> PathBuf {
        self.workdir.join(&self.name)
    }

    /// Maintenance socket path: `<workdir>/<name>.debug`.
    pub fn debug_socket_path(&self) -> PathBuf {
        self.workdir.join(format!("{}.debug", self.name))
    }
}

/// One worker process.
///
/// Holds the shared value store, the state machine, the serialization
/// gate and the child process supervisor. Servers and timers get a
/// `&Arc<Worker>` and reach everything through it.
pub struct Worker {
    config: WorkerConfig,
    values: Arc<SharedState>,
    machine: Machine,
    gate: Arc<SyncGate>,
    supervisor: Arc<Supervisor>,
    snapshot: Snapshot,
    pid_file: Mutex<Option<PathBuf>>,
    sockets: Mutex<Vec<PathBuf>>,
    finish_once: Once,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        let gate = Arc::new(SyncGate::new());
        let supervisor = Arc::new(Supervisor::new(gate.clone()));
        let snapshot = Snapshot::new(&config.workdir, config.name.clone());
        Worker {
            config,
            values: Arc::new(SharedState::new()),
            machine: Machine::new(),
            gate,
            supervisor,
            snapshot,
            pid_file: Mutex::new(None),
            sockets: Mutex::new(Vec::new()),
            finish_once: Once::new(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn workdir(&self) -> &Path {
        &self.config.workdir
    }

    pub fn debug(&self) -> bool {
        self.config.debug
    }

    /// The shared value store.
    pub fn values(&self) -> &Arc<SharedState> {
        &self.values
    }

    /// The event dispatch machine.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// The gate sync-mode handlers and timers serialize on.
    pub fn gate(&self) -> Arc<SyncGate> {
        self.gate.clone()
    }

    /// The child process supervisor.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Writes the value store to the snapshot file.
    pub fn save_values(&self) -> StateResult<()> {
        self.snapshot.save(&self.values, &self.descriptor())
    }

    /// Replaces the value store from the snapshot file.
    pub fn load_values(&self) -> StateResult<()> {
        self.snapshot.load(&self.values)
    }

    fn descriptor(&self) -> String {
        format!(
            "Worker {{ name: {:?}, workdir: {:?}, state: {:?} }}",
            self.config.name,
            self.config.workdir,
            self.machine.current_state(),
        )
    }

    /// Writes a sorted `key=> value` listing of the store.
    pub fn dump_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "\n===== values =====")?;
        for (key, value) in self.values.dump_sorted() {
            writeln!(out, "{}=> {}", key, display_value(&value))?;
        }
        Ok(())
    }

    /// SIGQUIT behavior: persist the values, and dump them to stdout
    /// when one is attached.
    pub fn quit_dump(&self) {
        if let Err(err) = self.save_values() {
            warn!("values were not saved: {}", err);
        }
        let stdout = io::stdout();
        if stdout.is_terminal() {
            let mut out = stdout.lock();
            let _ = self.dump_to(&mut out);
        }
    }

    /// Registers a socket file to unlink at shutdown.
    pub fn track_socket(&self, path: PathBuf) {
        self.sockets.lock().push(path);
    }

    /// Records the pid file created by the bootstrap so
    /// [`Worker::finish`] removes it.
    pub(crate) fn register_pid_file(&self, path: PathBuf) {
        *self.pid_file.lock() = Some(path);
    }

    /// Final cleanup: stop supervised programs, then unlink the pid
    /// file and any tracked sockets. Runs at most once; later calls are
    /// no-ops.
    pub fn finish(&self) {
        self.finish_once.call_once(|| {
            self.supervisor.shutdown(DEFAULT_EXIT_GRACE);
            if let Some(path) = self.pid_file.lock().take() {
                let _ = fs::remove_file(path);
            }
            for path in self.sockets.lock().drain(..) {
                let _ = fs::remove_file(path);
            }
            info!("finish");
        });
    }

    /// Cleans up and exits the process.
    pub fn shutdown(&self) -> ! {
        self.finish();
        process::exit(0);
    }
}

/// Strings print raw, everything else as JSON text.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ========================================================================
// Tests
// ========================================================================
