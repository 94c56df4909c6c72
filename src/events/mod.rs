//! Lifecycle events and event handling.
//!
//! Both the job calendar and the cluster supervisor report what they do as
//! [`Event`]s on an [`EventBus`]. The binary turns them into log lines; tests
//! record them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{RunId, SourceLocation};

/// Why the cluster shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A stop was requested (signal or [`crate::ClusterHandle::stop`]).
    Requested,
    /// A member died before surviving the minimum lifetime.
    FatalCrash { port: u16, lifetime: Duration },
    /// A member could not be launched.
    SpawnFailed { port: u16 },
}

/// Lifecycle events.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job action has started.
    JobStarted {
        job: String,
        source: SourceLocation,
        run_id: RunId,
        timestamp: Instant,
    },

    /// A job action finished without error.
    JobCompleted {
        job: String,
        source: SourceLocation,
        run_id: RunId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A job action returned an error or panicked.
    JobFailed {
        job: String,
        source: SourceLocation,
        run_id: RunId,
        error: String,
        duration: Duration,
        timestamp: Instant,
    },

    /// A worker process was launched.
    MemberSpawned {
        port: u16,
        pid: Option<u32>,
        /// True when this member replaces one that died.
        replacement: bool,
        timestamp: Instant,
    },

    /// A worker process exited.
    MemberExited {
        port: u16,
        pid: Option<u32>,
        exit_code: Option<i32>,
        lifetime: Duration,
        timestamp: Instant,
    },

    /// The cluster began shutting down.
    ClusterShutdown {
        reason: ShutdownReason,
        timestamp: Instant,
    },
}

impl Event {
    /// When the event was created.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobStarted { timestamp, .. } => *timestamp,
            Event::JobCompleted { timestamp, .. } => *timestamp,
            Event::JobFailed { timestamp, .. } => *timestamp,
            Event::MemberSpawned { timestamp, .. } => *timestamp,
            Event::MemberExited { timestamp, .. } => *timestamp,
            Event::ClusterShutdown { timestamp, .. } => *timestamp,
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(job: impl Into<String>, source: SourceLocation, run_id: RunId) -> Self {
        Event::JobStarted {
            job: job.into(),
            source,
            run_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(
        job: impl Into<String>,
        source: SourceLocation,
        run_id: RunId,
        duration: Duration,
    ) -> Self {
        Event::JobCompleted {
            job: job.into(),
            source,
            run_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobFailed event.
    pub fn job_failed(
        job: impl Into<String>,
        source: SourceLocation,
        run_id: RunId,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Event::JobFailed {
            job: job.into(),
            source,
            run_id,
            error: error.into(),
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a MemberSpawned event.
    pub fn member_spawned(port: u16, pid: Option<u32>, replacement: bool) -> Self {
        Event::MemberSpawned {
            port,
            pid,
            replacement,
            timestamp: Instant::now(),
        }
    }

    /// Create a MemberExited event.
    pub fn member_exited(
        port: u16,
        pid: Option<u32>,
        exit_code: Option<i32>,
        lifetime: Duration,
    ) -> Self {
        Event::MemberExited {
            port,
            pid,
            exit_code,
            lifetime,
            timestamp: Instant::now(),
        }
    }

    /// Create a ClusterShutdown event.
    pub fn cluster_shutdown(reason: ShutdownReason) -> Self {
        Event::ClusterShutdown {
            reason,
            timestamp: Instant::now(),
        }
    }
}

/// Receives every event emitted on a bus it is registered with.
///
/// Handlers run inline on the emitting task, in registration order, so a
/// slow handler delays the calendar or the supervisor.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

/// Fan-out of events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
