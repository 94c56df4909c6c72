//! Testing utilities for users of the jobvisor library.
//!
//! This module provides helpers for testing calendars and clusters:
//!
//! - [`SimulatedClock`]: Virtual time that jumps forward whenever the
//!   calendar sleeps
//! - [`CountingAction`]: An action that counts its invocations
//! - [`FailingAction`]: An action that always fails, optionally counting
//! - [`RecordingHandler`]: An event handler that keeps every event
//! - [`RecordingSink`]: A cluster output sink that keeps every line

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::calendar::Clock;
use crate::cluster::{OutputSink, OutputStream};
use crate::core::job::{ActionError, JobAction};
use crate::events::{Event, EventHandler};

/// A clock whose time only moves when told to.
///
/// Sleeping advances the clock by the requested duration and returns at once,
/// so a calendar can be driven through days of schedule in microseconds.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use jobvisor::testing::SimulatedClock;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
/// let clock = SimulatedClock::new(start);
/// clock.advance(std::time::Duration::from_secs(90));
/// assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
/// ```
#[derive(Debug)]
pub struct SimulatedClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: AtomicUsize,
}

impl SimulatedClock {
    /// Create a clock reading `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: AtomicUsize::new(0),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// How many times something slept on this clock.
    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        SimulatedClock::now(self)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// An action that counts how many times it ran.
#[derive(Debug, Default)]
pub struct CountingAction {
    count: AtomicUsize,
}

impl CountingAction {
    /// Create a new counter at zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of completed runs.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobAction for CountingAction {
    async fn run(&self) -> Result<(), ActionError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn description(&self) -> Option<String> {
        Some("counting action".to_string())
    }
}

/// An action that fails every time it runs.
#[derive(Debug)]
pub struct FailingAction {
    message: String,
    attempts: AtomicUsize,
}

impl FailingAction {
    /// Create an action failing with `message`.
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
            attempts: AtomicUsize::new(0),
        })
    }

    /// Number of times the action ran (and failed).
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobAction for FailingAction {
    async fn run(&self) -> Result<(), ActionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ActionError::Failed(self.message.clone()))
    }
}

/// Event handler that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    /// Create a new handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// `(job, error)` for every failed job run.
    pub async fn job_failures(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::JobFailed { job, error, .. } => Some((job.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }

    /// Names of jobs in the order they started.
    pub async fn jobs_started(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::JobStarted { job, .. } => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(port, replacement)` for every member spawned.
    pub async fn member_spawns(&self) -> Vec<(u16, bool)> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::MemberSpawned {
                    port, replacement, ..
                } => Some((*port, *replacement)),
                _ => None,
            })
            .collect()
    }

    /// Ports of every member that exited.
    pub async fn member_exits(&self) -> Vec<u16> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::MemberExited { port, .. } => Some(*port),
                _ => None,
            })
            .collect()
    }

    /// Wait until `predicate` holds for the recorded events, polling.
    ///
    /// Returns false if `timeout` passes first.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        let start = tokio::time::Instant::now();
        loop {
            if predicate(&self.events.lock().await) {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Output sink that keeps every line written by cluster members.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(u16, OutputStream, String)>>,
}

impl RecordingSink {
    /// Create a new sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(port, stream, line)` for every line so far.
    pub fn lines(&self) -> Vec<(u16, OutputStream, String)> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OutputSink for RecordingSink {
    fn write_line(&self, port: u16, stream: OutputStream, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((port, stream, line.to_string()));
    }
}
