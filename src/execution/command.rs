//! External command job actions.
//!
//! [`CommandAction`] wraps shell commands and external executables so they
//! can be scheduled on a [`JobCalendar`](crate::JobCalendar). Job files
//! declare every job as a command; library users may also build them
//! directly.
//!
//! # Quick Start
//!
//! ```rust
//! use jobvisor::CommandAction;
//! use std::time::Duration;
//!
//! // Simple command
//! let action = CommandAction::builder("echo")
//!     .arg("hello")
//!     .build();
//!
//! // Command with environment and timeout
//! let report = CommandAction::builder("./bin/report")
//!     .args(["--full", "--since", "yesterday"])
//!     .env("LOG_LEVEL", "info")
//!     .working_dir("/srv/app")
//!     .timeout(Duration::from_secs(600))
//!     .build();
//! ```
//!
//! # Error Handling
//!
//! - **Non-zero exit code**: [`ActionError::CommandFailed`] with the exit code
//!   and captured stderr
//! - **Timeout**: [`ActionError::Timeout`]; the child is killed when the
//!   pending command future is dropped
//! - **Execution failure**: [`ActionError::ExecutionFailed`] if the command
//!   cannot be started (e.g., program not found)
//!
//! In every case the calendar logs the error with the job's source location
//! and carries on with the next job.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::environment::Environment;
use crate::core::job::{ActionError, JobAction};

/// Runs an external program to completion each time the job fires.
///
/// The child inherits the calendar's environment with [`Environment`] layered
/// on top. Its stdout is logged at debug level; stderr is kept for the error
/// when the program exits non-zero.
#[derive(Debug, Clone)]
pub struct CommandAction {
    program: String,
    args: Vec<String>,
    environment: Environment,
    working_dir: Option<PathBuf>,
    /// Wall-clock limit per run; unlimited when unset.
    timeout: Option<Duration>,
}

impl CommandAction {
    /// Start building an action for `program`.
    pub fn builder(program: impl Into<String>) -> CommandActionBuilder {
        CommandActionBuilder::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The child process, with output captured and killed if dropped.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.environment.apply(&mut cmd);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn launch_failed(&self, error: std::io::Error) -> ActionError {
        ActionError::ExecutionFailed(format!("{}: {}", self.program, error))
    }
}

#[async_trait]
impl JobAction for CommandAction {
    async fn run(&self) -> Result<(), ActionError> {
        let mut cmd = self.command();
        // Dropping the pending future on timeout kills the child.
        let output = match self.timeout {
            Some(limit) => timeout(limit, cmd.output())
                .await
                .map_err(|_| ActionError::Timeout(limit))?,
            None => cmd.output().await,
        }
        .map_err(|e| self.launch_failed(e))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!(program = %self.program, "{}", line);
        }

        if output.status.success() {
            return Ok(());
        }
        // Killed by a signal: no exit code.
        Err(ActionError::CommandFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }

    fn description(&self) -> Option<String> {
        let mut text = self.program.clone();
        for arg in &self.args {
            text.push(' ');
            text.push_str(arg);
        }
        Some(text)
    }
}

/// Builder for [`CommandAction`].
#[derive(Debug, Clone)]
pub struct CommandActionBuilder {
    program: String,
    args: Vec<String>,
    environment: Environment,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandActionBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            environment: Environment::default(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments, in order.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the variables layered on the child's environment.
    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    /// Set one variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment = self.environment.with_var(key, value);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Kill the child and fail the run after `duration`.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn build(self) -> CommandAction {
        CommandAction {
            program: self.program,
            args: self.args,
            environment: self.environment,
            working_dir: self.working_dir,
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_command_action_with_program_and_args() {
        let action = CommandAction::builder("echo")
            .arg("hello")
            .arg("world")
            .build();

        assert_eq!(action.program(), "echo");
        assert_eq!(action.args(), &["hello", "world"]);
        assert_eq!(action.description().as_deref(), Some("echo hello world"));
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let action = CommandAction::builder("echo").arg("hello").build();

        assert!(action.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_command_with_environment_variables() {
        let action = CommandAction::builder("sh")
            .arg("-c")
            .arg("test \"$MY_VAR\" = test_value")
            .env("MY_VAR", "test_value")
            .build();

        assert!(action.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_command_with_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let action = CommandAction::builder("sh")
            .arg("-c")
            .arg("touch marker")
            .working_dir(dir.path())
            .build();

        action.run().await.unwrap();

        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_command_returns_exit_code_and_stderr_on_failure() {
        let action = CommandAction::builder("sh")
            .arg("-c")
            .arg("echo broken >&2; exit 42")
            .build();

        match action.run().await.unwrap_err() {
            ActionError::CommandFailed { code, stderr } => {
                assert_eq!(code, 42);
                assert_eq!(stderr, "broken");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_command_with_timeout() {
        let action = CommandAction::builder("sleep")
            .arg("10")
            .timeout(Duration::from_millis(100))
            .build();

        match action.run().await.unwrap_err() {
            ActionError::Timeout(duration) => {
                assert_eq!(duration, Duration::from_millis(100));
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let action = CommandAction::builder("/nonexistent/jobvisor-test-program").build();

        let err = action.run().await.unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(_)));
    }

    #[test]
    fn test_builder_chaining() {
        let action = CommandAction::builder("python")
            .arg("-c")
            .arg("print('hello')")
            .env("PYTHONPATH", "/app")
            .working_dir("/tmp")
            .timeout(Duration::from_secs(30))
            .build();

        assert_eq!(action.program(), "python");
        assert_eq!(action.args(), &["-c", "print('hello')"]);
        assert_eq!(action.environment().get("PYTHONPATH"), Some("/app"));
        assert_eq!(action.working_dir(), Some(&PathBuf::from("/tmp")));
        assert_eq!(action.timeout(), Some(Duration::from_secs(30)));
    }
}
