//! Cluster configuration.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::types::ClusterError;
use crate::core::environment::Environment;

/// Default port the pool counts up from.
pub const DEFAULT_BASE_PORT: u16 = 9000;

/// Default minimum lifetime before a member death counts as transient.
pub const DEFAULT_MINIMUM_SURVIVAL: Duration = Duration::from_secs(30);

/// Default time a member gets to exit after SIGTERM before it is killed.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The command line used to launch each worker.
///
/// `--port <n>` is appended to the arguments for every member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    environment: Environment,
    working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            environment: Environment::new(),
            working_dir: None,
        }
    }

    /// Builder: add a single argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builder: add multiple arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builder: set environment variables.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Builder: set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the arguments, without the port.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The full argument list for a member bound to `port`.
    pub fn args_for(&self, port: u16) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--port".to_string());
        args.push(port.to_string());
        args
    }

    pub(crate) fn command_for(&self, port: u16) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(port));

        self.environment.apply(&mut cmd);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Configuration for a [`Cluster`](super::Cluster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    base_port: u16,
    pool_size: usize,
    command: WorkerCommand,
    minimum_survival: Duration,
    shutdown_timeout: Duration,
}

impl ClusterConfig {
    /// A single-member pool running `command` with default timings.
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            pool_size: 1,
            command,
            minimum_survival: DEFAULT_MINIMUM_SURVIVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Builder: members bind to `base_port + 1` onwards.
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    /// Builder: number of members to keep alive.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Builder: a member dying sooner than this after launch is fatal.
    pub fn with_minimum_survival(mut self, minimum_survival: Duration) -> Self {
        self.minimum_survival = minimum_survival;
        self
    }

    /// Builder: how long a member gets to exit after SIGTERM on shutdown.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Get the base port.
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Get the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the worker command.
    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Get the minimum survival time.
    pub fn minimum_survival(&self) -> Duration {
        self.minimum_survival
    }

    /// Get the shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Ports of the pool, in spawn order.
    pub fn ports(&self) -> impl Iterator<Item = u16> + use<> {
        let base = self.base_port;
        (1..=self.pool_size).filter_map(move |i| u16::try_from(i).ok()?.checked_add(base))
    }

    /// Check that the pool fits in the port range and has something to run.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.pool_size == 0 {
            return Err(ClusterError::InvalidConfig(
                "pool_size must be at least 1".into(),
            ));
        }

        let last = u16::try_from(self.pool_size)
            .ok()
            .and_then(|size| self.base_port.checked_add(size));
        if last.is_none() {
            return Err(ClusterError::InvalidConfig(format!(
                "{} members starting after port {} exceed the port range",
                self.pool_size, self.base_port
            )));
        }

        if self.command.program.trim().is_empty() {
            return Err(ClusterError::InvalidConfig(
                "worker program must not be empty".into(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ClusterError::InvalidConfig(
                "shutdown_timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
