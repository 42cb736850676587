//! Description of a program to launch.

use std::path::PathBuf;

use drover_common::SyncMode;

/// Whether a program may run more than once at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPolicy {
    /// One instance per registry name; a second run is rejected.
    #[default]
    Single,
    /// Any number of instances; each registers as `command#pid`.
    Plural,
}

/// What the supervisor does with the program at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Terminated during [`Supervisor::shutdown`](crate::Supervisor::shutdown).
    #[default]
    Kill,
    /// Left running; the program outlives the worker.
    Stay,
}

/// Builder for a supervised program.
///
/// Consumed by [`Supervisor::run`](crate::Supervisor::run).
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) command: String,
    pub(crate) args: Vec<String>,
    pub(crate) name: Option<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) run_policy: RunPolicy,
    pub(crate) sync_mode: SyncMode,
    pub(crate) exit_policy: ExitPolicy,
}

impl Program {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            name: None,
            env: Vec::new(),
            cwd: None,
            run_policy: RunPolicy::default(),
            sync_mode: SyncMode::default(),
            exit_policy: ExitPolicy::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Registry name. Single-run programs default to the command
    /// itself; plural programs always register as `command#pid`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Allow several instances at once.
    pub fn plural(mut self) -> Self {
        self.run_policy = RunPolicy::Plural;
        self
    }

    /// Whether the completion hook takes the worker gate.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Leave the program running when the worker shuts down.
    pub fn stay_on_exit(mut self) -> Self {
        self.exit_policy = ExitPolicy::Stay;
        self
    }

    pub fn command_line(&self) -> &str {
        &self.command
    }
}
