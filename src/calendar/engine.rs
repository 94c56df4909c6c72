//! Job calendar implementation.
//!
//! The calendar is responsible for:
//! - Registering recurring jobs and computing their first run
//! - Running due jobs strictly one at a time, earliest first
//! - Isolating each job's failures from the loop and from other jobs
//! - Sleeping until the next deadline, interruptibly
//! - Event emission

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::frequency::{Frequency, TimeOfDay};
use crate::core::job::{ActionError, Job, JobAction};
use crate::core::types::{RunId, SourceLocation};
use crate::events::{Event, EventBus};

use super::clock::{Clock, SystemClock};
use super::handle::StopHandle;
use super::types::{CalendarError, RunOutcome};

/// Padding added to every sleep so the loop never wakes just before a
/// deadline because of clock granularity.
const WAKE_PADDING: Duration = Duration::from_secs(1);

/// A set of recurring jobs and the loop that drives them.
pub struct JobCalendar {
    /// Registered jobs. Sorted by next run before each dispatch pass.
    jobs: Vec<Job>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Timezone for calendar arithmetic.
    timezone: Tz,
    /// Cancelled when a stop is requested.
    stop: CancellationToken,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
}

impl JobCalendar {
    /// Create an empty calendar using the system clock and UTC.
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            clock: Arc::new(SystemClock),
            timezone: chrono_tz::UTC,
            stop: CancellationToken::new(),
            event_bus: Arc::new(EventBus::new()),
        }
    }

    /// Set the clock. Only affects jobs registered afterwards.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the timezone. Only affects jobs registered afterwards.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Register a job. Its first run is computed immediately.
    pub fn schedule_job(
        &mut self,
        name: impl Into<String>,
        source: impl Into<SourceLocation>,
        action: Arc<dyn JobAction>,
        frequency: Frequency,
        time_of_day: Option<TimeOfDay>,
    ) -> &Job {
        let job = Job::new(
            name,
            source,
            frequency,
            time_of_day,
            action,
            self.clock.now(),
            self.timezone,
        );
        tracing::debug!(
            job = job.name(),
            source = %job.source(),
            frequency = %job.frequency(),
            next_run_at = %job.next_run_at(),
            "Scheduled job"
        );
        self.jobs.push(job);
        &self.jobs[self.jobs.len() - 1]
    }

    /// Register a job from textual rule and time of day (e.g. `"daily"`,
    /// `"0800"`).
    ///
    /// Unknown rules and malformed times are rejected without touching the
    /// jobs already registered.
    pub fn schedule(
        &mut self,
        name: impl Into<String>,
        source: impl Into<SourceLocation>,
        action: Arc<dyn JobAction>,
        rule: &str,
        time_of_day: Option<&str>,
    ) -> Result<&Job, CalendarError> {
        let name = name.into();
        let invalid = |source| CalendarError::InvalidSchedule {
            job: name.clone(),
            source,
        };

        let frequency: Frequency = rule.parse().map_err(invalid)?;
        let time_of_day = time_of_day
            .map(str::parse::<TimeOfDay>)
            .transpose()
            .map_err(invalid)?;

        Ok(self.schedule_job(name, source, action, frequency, time_of_day))
    }

    /// Registered jobs, in their current order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.name() == name)
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// A handle that can stop the calendar from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.stop.clone())
    }

    /// Request a stop. Idempotent.
    pub fn request_stop(&self) {
        self.stop_handle().request_stop();
    }

    /// Run until a stop is requested or there is nothing to run.
    ///
    /// Each pass runs every job that is due, then sleeps until the earliest
    /// next run plus one second. A stop request interrupts the sleep at
    /// once; a job already running is never interrupted.
    pub async fn run(&mut self) -> RunOutcome {
        tracing::info!(jobs = self.jobs.len(), "Calendar started");

        loop {
            self.sort_jobs();
            self.dispatch_due().await;

            if self.stop.is_cancelled() {
                tracing::info!("Calendar stopped cleanly");
                return RunOutcome::Stopped;
            }

            let Some(next) = self.jobs.first() else {
                tracing::warn!("Calendar has no jobs to run");
                return RunOutcome::NothingToRun;
            };

            let delay = sleep_duration(next.next_run_at(), self.clock.now());
            tracing::debug!(
                job = next.name(),
                next_run_at = %next.next_run_at(),
                delay = ?delay,
                "Sleeping until next job is due"
            );

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {}
                _ = self.clock.sleep(delay) => {}
            }

            if self.stop.is_cancelled() {
                tracing::info!("Calendar stopped cleanly");
                return RunOutcome::Stopped;
            }
        }
    }

    /// Run due jobs, earliest first, until the earliest is in the future.
    async fn dispatch_due(&mut self) {
        loop {
            let now = self.clock.now();
            match self.jobs.first() {
                Some(job) if job.is_due(now) => {}
                _ => return,
            }

            self.run_first().await;
            self.sort_jobs();
        }
    }

    /// Run the named job now, outside its schedule.
    ///
    /// The job's next run is left as it was.
    pub async fn trigger(&mut self, name: &str) -> Result<(), CalendarError> {
        let index = self
            .jobs
            .iter()
            .position(|job| job.name() == name)
            .ok_or_else(|| CalendarError::UnknownJob(name.to_string()))?;

        self.execute(index)
            .await
            .map_err(|source| CalendarError::JobFailed {
                job: name.to_string(),
                source,
            })
    }

    /// Run the job at the front of the list and reschedule it.
    async fn run_first(&mut self) {
        let due = self.jobs[0].next_run_at();
        // Failures are already logged and emitted.
        let _ = self.execute(0).await;

        // The deadline just used must never come due a second time, even if
        // the clock has not moved.
        let now = self
            .clock
            .now()
            .max(due + chrono::Duration::milliseconds(1));
        let timezone = self.timezone;
        let job = &mut self.jobs[0];
        job.reschedule(now, timezone);
        // A next run in the past would keep the job due forever.
        if job.next_run_at() < now {
            let fallback = now + chrono::Duration::hours(1);
            tracing::error!(
                job = job.name(),
                frequency = %job.frequency(),
                computed = %job.next_run_at(),
                next_run_at = %fallback,
                "Recurrence rule went backwards, deferring job"
            );
            job.defer_until(fallback);
        }
        tracing::debug!(job = job.name(), next_run_at = %job.next_run_at(), "Rescheduled job");
    }

    /// Run one job's action in isolation, reporting the result.
    async fn execute(&mut self, index: usize) -> Result<(), ActionError> {
        let job = &self.jobs[index];
        let name = job.name().to_string();
        let source = job.source().clone();
        let action = job.action();

        let run_id = RunId::new();
        let started_at = self.clock.now();
        tracing::info!(job = %name, source = %source, run_id = %run_id, "Running job");
        self.event_bus
            .emit(Event::job_started(&name, source.clone(), run_id.clone()))
            .await;

        let start = Instant::now();
        let result = match tokio::spawn(async move { action.run().await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(ActionError::Panicked(panic_message(join_err.into_panic())))
            }
            Err(join_err) => Err(ActionError::Failed(join_err.to_string())),
        };
        let duration = start.elapsed();

        self.jobs[index].record_run(started_at);

        match &result {
            Ok(()) => {
                tracing::info!(job = %name, run_id = %run_id, duration = ?duration, "Job completed");
                self.event_bus
                    .emit(Event::job_completed(&name, source, run_id, duration))
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    job = %name,
                    source = %source,
                    run_id = %run_id,
                    error = %e,
                    error_debug = ?e,
                    "Job failed"
                );
                self.event_bus
                    .emit(Event::job_failed(
                        &name,
                        source,
                        run_id,
                        e.to_string(),
                        duration,
                    ))
                    .await;
            }
        }

        result
    }

    fn sort_jobs(&mut self) {
        self.jobs.sort_by_key(|job| job.next_run_at());
    }
}

impl Default for JobCalendar {
    fn default() -> Self {
        Self::new()
    }
}

/// Time to sleep before `next` is due, padded.
fn sleep_duration(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now)
        .to_std()
        .map(|d| d + WAKE_PADDING)
        .unwrap_or(Duration::ZERO)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
