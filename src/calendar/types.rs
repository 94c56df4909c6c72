//! Calendar error and outcome types.

use thiserror::Error;

use crate::core::frequency::FrequencyError;
use crate::core::job::ActionError;

/// Errors that can occur while registering or triggering jobs.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The recurrence rule or time of day is not valid.
    #[error("invalid schedule for job '{job}': {source}")]
    InvalidSchedule {
        job: String,
        #[source]
        source: FrequencyError,
    },

    /// No job with this name is registered.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// A manually triggered job failed.
    #[error("job '{job}' failed: {source}")]
    JobFailed {
        job: String,
        #[source]
        source: ActionError,
    },
}

/// How [`JobCalendar::run`](super::JobCalendar::run) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A stop was requested.
    Stopped,
    /// The calendar holds no jobs.
    NothingToRun,
}
