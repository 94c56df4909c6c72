//! Job definition and the unit of work it runs.
//!
//! A [`Job`] pairs a [`JobAction`] with a recurrence rule and keeps track of
//! when it should run next. Jobs live for the lifetime of the calendar that
//! owns them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::frequency::{Frequency, TimeOfDay};
use super::types::SourceLocation;

/// Errors a job action can report.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action failed with a message.
    #[error("execution failed: {0}")]
    Failed(String),

    /// The action could not be started.
    #[error("failed to start: {0}")]
    ExecutionFailed(String),

    /// An external command exited unsuccessfully.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// The action ran longer than its timeout.
    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    /// The action panicked.
    #[error("action panicked: {0}")]
    Panicked(String),
}

/// The work a job performs each time it comes due.
///
/// # Example
///
/// ```ignore
/// use jobvisor::{ActionError, JobAction};
/// use async_trait::async_trait;
///
/// struct Vacuum;
///
/// #[async_trait]
/// impl JobAction for Vacuum {
///     async fn run(&self) -> Result<(), ActionError> {
///         // compact the database
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobAction: Send + Sync {
    /// Run the action once.
    async fn run(&self) -> Result<(), ActionError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<String> {
        None
    }
}

/// Adapter turning a plain closure into a [`JobAction`].
pub struct FnAction<F> {
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn() -> Result<(), ActionError> + Send + Sync + 'static,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> JobAction for FnAction<F>
where
    F: Fn() -> Result<(), ActionError> + Send + Sync + 'static,
{
    async fn run(&self) -> Result<(), ActionError> {
        (self.f)()
    }
}

/// Shorthand for `Arc::new(FnAction::new(f))`.
pub fn action_fn<F>(f: F) -> Arc<dyn JobAction>
where
    F: Fn() -> Result<(), ActionError> + Send + Sync + 'static,
{
    Arc::new(FnAction::new(f))
}

/// A recurring job.
#[derive(Clone)]
pub struct Job {
    /// Human-readable name.
    name: String,
    /// Where the job was declared.
    source: SourceLocation,
    /// Recurrence rule.
    frequency: Frequency,
    /// Time of day the job runs (ignored for hourly jobs).
    time_of_day: TimeOfDay,
    /// The work to perform.
    action: Arc<dyn JobAction>,
    /// When the job is next due.
    next_run_at: DateTime<Utc>,
    /// When the job last started, if ever.
    last_run_at: Option<DateTime<Utc>>,
    /// Number of completed invocations, successful or not.
    run_count: u64,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("frequency", &self.frequency)
            .field("time_of_day", &self.time_of_day)
            .field("next_run_at", &self.next_run_at)
            .field("run_count", &self.run_count)
            .finish()
    }
}

impl Job {
    /// Create a job whose first run is computed relative to `now`.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<SourceLocation>,
        frequency: Frequency,
        time_of_day: Option<TimeOfDay>,
        action: Arc<dyn JobAction>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Self {
        let time_of_day = time_of_day.unwrap_or(TimeOfDay::MIDNIGHT);
        Self {
            name: name.into(),
            source: source.into(),
            frequency,
            time_of_day,
            action,
            next_run_at: frequency.next_after(now, time_of_day, tz),
            last_run_at: None,
            run_count: 0,
        }
    }

    /// Recompute the next run relative to `now`.
    pub fn reschedule(&mut self, now: DateTime<Utc>, tz: Tz) {
        self.next_run_at = self.frequency.next_after(now, self.time_of_day, tz);
    }

    /// Force the next run to `at`, overriding the rule.
    pub(crate) fn defer_until(&mut self, at: DateTime<Utc>) {
        self.next_run_at = at;
    }

    pub(crate) fn record_run(&mut self, started_at: DateTime<Utc>) {
        self.last_run_at = Some(started_at);
        self.run_count += 1;
    }

    /// Whether the job is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at <= now
    }

    /// Get the job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the source location.
    pub fn source(&self) -> &SourceLocation {
        &self.source
    }

    /// Get the recurrence rule.
    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Get the time of day.
    pub fn time_of_day(&self) -> TimeOfDay {
        self.time_of_day
    }

    /// Get the action.
    pub fn action(&self) -> Arc<dyn JobAction> {
        Arc::clone(&self.action)
    }

    /// When the job is next due.
    pub fn next_run_at(&self) -> DateTime<Utc> {
        self.next_run_at
    }

    /// When the job last started.
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    /// How many times the job has run.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }
}
