//! Worker bootstrap.
//!
//! [`Runner`] takes a worker from config to a running daemon: privilege
//! drop, log setup, pid file, daemonization, signal handling, then the
//! application setup hook and an optional idle task. Run modes carve
//! pieces out of that sequence for debugging and embedding.

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;

use nix::unistd::{chdir, fork, setgid, setsid, setuid, ForkResult, User};
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::errors::{BootstrapError, BootstrapResult, BOOTSTRAP_EXIT_CODE};
use crate::worker::Worker;

/// Switches that drop steps from the bootstrap sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stay attached to the terminal instead of daemonizing.
    Foreground,
    /// Return from [`Runner::run`] instead of parking the main thread.
    NoStop,
    /// Skip pid file creation and the duplicate-instance check.
    NoPid,
    /// Skip log initialization.
    NoLog,
    /// Shut the worker down once the idle task returns.
    ExitAfterIdleTask,
}

type SetupHook =
    Box<dyn FnOnce(&Arc<Worker>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;
type IdleTask = Box<dyn FnOnce(&Arc<Worker>) + Send>;

/// Boots a [`Worker`] into a running process.
pub struct Runner {
    worker: Arc<Worker>,
    modes: Vec<RunMode>,
    setup: Option<SetupHook>,
    idle_task: Option<IdleTask>,
}

impl Runner {
    pub fn new(worker: Arc<Worker>) -> Self {
        Runner {
            worker,
            modes: Vec::new(),
            setup: None,
            idle_task: None,
        }
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        if !self.modes.contains(&mode) {
            self.modes.push(mode);
        }
        self
    }

    /// Application setup, run after daemonizing. Bind servers, restore
    /// values and register handlers here.
    pub fn on_setup<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&Arc<Worker>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'static,
    {
        self.setup = Some(Box::new(setup));
        self
    }

    /// Background task started after setup, on its own thread.
    pub fn idle_task<F>(mut self, task: F) -> Self
    where
        F: FnOnce(&Arc<Worker>) + Send + 'static,
    {
        self.idle_task = Some(Box::new(task));
        self
    }

    fn has(&self, mode: RunMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Runs the bootstrap sequence.
    ///
    /// Unless `NoStop` is set this parks the calling thread forever;
    /// shutdown then happens through signals or the maintenance socket.
    /// With `NoStop` it returns once the worker is up.
    pub fn run(mut self) -> BootstrapResult<()> {
        let config = self.worker.config().clone();

        if let Some(user) = &config.privilege {
            drop_privilege(user)?;
        }

        if !self.has(RunMode::NoLog) {
            init_logging(&config.log_path(), config.debug)?;
        }

        if !self.has(RunMode::NoPid) {
            write_pid_file(&self.worker, &config.pid_path())?;
        }

        let daemonized = !self.has(RunMode::Foreground);
        if daemonized {
            daemonize()?;
            // The pid changed across the forks.
            if !self.has(RunMode::NoPid) {
                fs::write(config.pid_path(), process::id().to_string())?;
            }
        }

        spawn_signal_watcher(self.worker.clone())?;

        info!("start");

        if let Some(setup) = self.setup.take() {
            if let Err(err) = setup(&self.worker) {
                error!("setup failed: {}", err);
                self.worker.finish();
                if daemonized {
                    process::exit(BOOTSTRAP_EXIT_CODE);
                }
                return Err(BootstrapError::Setup(err));
            }
        }

        if let Some(task) = self.idle_task.take() {
            let worker = self.worker.clone();
            let exit_after = self.has(RunMode::ExitAfterIdleTask);
            thread::Builder::new()
                .name("idle-task".to_string())
                .spawn(move || {
                    if catch_unwind(AssertUnwindSafe(|| task(&worker))).is_err() {
                        error!("idle task panicked");
                    }
                    if exit_after {
                        worker.shutdown();
                    }
                })?;
        }

        if !self.has(RunMode::NoStop) {
            loop {
                thread::park();
            }
        }
        Ok(())
    }
}

fn drop_privilege(name: &str) -> BootstrapResult<()> {
    let user = User::from_name(name)
        .map_err(|err| BootstrapError::privilege(name, err))?
        .ok_or_else(|| BootstrapError::unknown_user(name))?;
    setgid(user.gid).map_err(|err| BootstrapError::privilege(name, err))?;
    setuid(user.uid).map_err(|err| BootstrapError::privilege(name, err))?;
    Ok(())
}

/// Debug mode logs to stderr at debug level; otherwise the log file is
/// appended to at info level. `RUST_LOG` overrides the level either
/// way. Repeat initialization keeps the first subscriber.
fn init_logging(path: &Path, debug: bool) -> BootstrapResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);
    if debug {
        builder.with_writer(io::stderr).try_init().ok();
    } else {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        builder.with_writer(Arc::new(file)).try_init().ok();
    }
    Ok(())
}

/// An existing pid file means another instance is still working; that
/// check is by existence only, stale files must be removed by hand.
fn write_pid_file(worker: &Arc<Worker>, path: &Path) -> BootstrapResult<()> {
    if path.is_dir() {
        return Err(BootstrapError::PidFileIsDirectory {
            path: path.to_path_buf(),
        });
    }
    if path.exists() {
        return Err(BootstrapError::StillWorking {
            path: path.to_path_buf(),
        });
    }
    fs::write(path, process::id().to_string())?;
    worker.register_pid_file(path.to_path_buf());
    Ok(())
}

/// Classic double fork: detach from the session, reparent to init, and
/// point stdio at /dev/null. The log file stays open across the forks.
fn daemonize() -> BootstrapResult<()> {
    match unsafe { fork() }.map_err(BootstrapError::Daemonize)? {
        ForkResult::Parent { .. } => process::exit(0),
        ForkResult::Child => {}
    }
    setsid().map_err(BootstrapError::Daemonize)?;
    match unsafe { fork() }.map_err(BootstrapError::Daemonize)? {
        ForkResult::Parent { .. } => process::exit(0),
        ForkResult::Child => {}
    }
    chdir("/").map_err(BootstrapError::Daemonize)?;

    let null = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for target in 0..=2 {
        if unsafe { libc::dup2(null.as_raw_fd(), target) } < 0 {
            return Err(BootstrapError::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// QUIT dumps the value store, TERM and INT shut the worker down.
fn spawn_signal_watcher(worker: Arc<Worker>) -> BootstrapResult<()> {
    let mut signals = Signals::new([SIGQUIT, SIGTERM, SIGINT])?;
    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                match signal {
                    SIGQUIT => {
                        debug!("caught SIGQUIT, dumping values");
                        worker.quit_dump();
                    }
                    SIGTERM | SIGINT => {
                        info!("caught signal {}, shutting down", signal);
                        worker.shutdown();
                    }
                    _ => {}
                }
            }
        })?;
    Ok(())
}

// ========================================================================
// Tests
// ========================================================================
