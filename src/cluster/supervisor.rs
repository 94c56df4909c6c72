//! Cluster supervisor.
//!
//! The supervisor is responsible for:
//! - Launching one worker per port of the pool
//! - Forwarding worker output to a single serialized sink
//! - Respawning workers that die after surviving long enough
//! - Tearing the whole pool down when a worker dies too soon
//! - Bounded shutdown of every member on stop

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::config::ClusterConfig;
use super::member::{ClusterMember, MemberSnapshot};
use super::sink::{OutputSink, OutputStream, TracingSink};
use super::types::{ClusterError, ClusterOutcome};
use crate::events::{Event, EventBus, ShutdownReason};

/// Why the cluster is going down on its own.
#[derive(Debug)]
enum Failure {
    FatalCrash { port: u16, lifetime: Duration },
    SpawnFailed(ClusterError),
}

/// Member table, guarded by the death-handling mutex.
#[derive(Debug, Default)]
struct ClusterState {
    members: BTreeMap<u16, ClusterMember>,
    next_generation: u64,
    failure: Option<Failure>,
}

/// Stop signal and member table shared with handles.
#[derive(Debug, Default)]
struct Control {
    state: Mutex<ClusterState>,
    shutting_down: AtomicBool,
    started: AtomicBool,
    stop: CancellationToken,
}

impl Control {
    fn request_stop(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!("Cluster stop requested");
        }
        self.stop.cancel();
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn members(&self) -> Vec<MemberSnapshot> {
        let state = self.state.lock().await;
        state.members.values().map(ClusterMember::snapshot).collect()
    }
}

/// Keeps a fixed pool of worker processes alive.
///
/// # Example
///
/// ```ignore
/// let config = ClusterConfig::new(WorkerCommand::new("./server"))
///     .with_base_port(9000)
///     .with_pool_size(4);
/// let cluster = Cluster::new(config)?;
/// let handle = cluster.handle();
/// tokio::spawn(async move { shutdown.cancelled().await; handle.stop() });
/// let outcome = cluster.start().await?;
/// ```
pub struct Cluster {
    config: ClusterConfig,
    sink: Arc<dyn OutputSink>,
    event_bus: Arc<EventBus>,
    control: Arc<Control>,
}

impl Cluster {
    /// Create a cluster. Nothing is launched until [`Cluster::start`].
    pub fn new(config: ClusterConfig) -> Result<Self, ClusterError> {
        config.validate()?;
        Ok(Self {
            config,
            sink: Arc::new(TracingSink::new()),
            event_bus: Arc::new(EventBus::new()),
            control: Arc::new(Control::default()),
        })
    }

    /// Set where member output goes.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// A handle that can stop or inspect the cluster from other tasks.
    pub fn handle(&self) -> ClusterHandle {
        ClusterHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn stop(&self) {
        self.control.request_stop();
    }

    /// Snapshot of the live members, ordered by port.
    pub async fn members(&self) -> Vec<MemberSnapshot> {
        self.control.members().await
    }

    /// Launch the pool and supervise it until stopped.
    ///
    /// Returns once every member has been shut down. A member dying before
    /// the minimum survival time ends the run with
    /// [`ClusterOutcome::FatalCrash`]. A worker that cannot be launched at
    /// all ends it with [`ClusterError::Spawn`].
    pub async fn start(&self) -> Result<ClusterOutcome, ClusterError> {
        if self.control.started.swap(true, Ordering::SeqCst) {
            return Err(ClusterError::AlreadyStarted);
        }

        let supervisor = Arc::new(Supervisor {
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
            event_bus: Arc::clone(&self.event_bus),
            control: Arc::clone(&self.control),
        });
        supervisor.run().await
    }
}

/// Cloneable handle to a [`Cluster`].
#[derive(Clone)]
pub struct ClusterHandle {
    control: Arc<Control>,
}

impl ClusterHandle {
    /// Request shutdown. Idempotent.
    pub fn stop(&self) {
        self.control.request_stop();
    }

    /// Whether shutdown has begun, requested or after a fatal crash.
    pub fn is_shutting_down(&self) -> bool {
        self.control.is_shutting_down()
    }

    /// Snapshot of the live members, ordered by port.
    pub async fn members(&self) -> Vec<MemberSnapshot> {
        self.control.members().await
    }
}

/// The running side of a cluster, shared with every monitor task.
struct Supervisor {
    config: ClusterConfig,
    sink: Arc<dyn OutputSink>,
    event_bus: Arc<EventBus>,
    control: Arc<Control>,
}

impl Supervisor {
    async fn run(self: Arc<Self>) -> Result<ClusterOutcome, ClusterError> {
        tracing::info!(
            pool_size = self.config.pool_size(),
            base_port = self.config.base_port(),
            program = self.config.command().program(),
            "Cluster starting"
        );

        let mut events = Vec::new();
        {
            let mut state = self.control.state.lock().await;
            for port in self.config.ports() {
                if self.control.is_shutting_down() {
                    break;
                }
                match self.spawn_member(&mut state, port) {
                    Ok(pid) => events.push(Event::member_spawned(port, pid, false)),
                    Err(e) => {
                        tracing::error!(port, error = %e, "Failed to spawn cluster member");
                        state.failure = Some(Failure::SpawnFailed(e));
                        self.control.request_stop();
                    }
                }
            }
        }
        self.emit_all(events).await;

        self.control.stop.cancelled().await;
        self.control.shutting_down.store(true, Ordering::SeqCst);

        let members: Vec<ClusterMember> = {
            let mut state = self.control.state.lock().await;
            std::mem::take(&mut state.members).into_values().collect()
        };
        tracing::info!(members = members.len(), "Cluster shutting down");

        let timeout = self.config.shutdown_timeout();
        let mut dying = JoinSet::new();
        for member in members {
            dying.spawn(member.die(timeout));
        }
        while let Some(result) = dying.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Cluster member shutdown task failed");
            }
        }

        let failure = self.control.state.lock().await.failure.take();
        let (reason, result) = match failure {
            None => (ShutdownReason::Requested, Ok(ClusterOutcome::Stopped)),
            Some(Failure::FatalCrash { port, lifetime }) => (
                ShutdownReason::FatalCrash { port, lifetime },
                Ok(ClusterOutcome::FatalCrash { port, lifetime }),
            ),
            Some(Failure::SpawnFailed(e)) => {
                let port = match &e {
                    ClusterError::Spawn { port, .. } => *port,
                    _ => 0,
                };
                (ShutdownReason::SpawnFailed { port }, Err(e))
            }
        };
        self.event_bus.emit(Event::cluster_shutdown(reason)).await;
        tracing::info!("Cluster stopped");
        result
    }

    /// Launch a worker on `port` and start its monitor.
    ///
    /// Synchronous so it can run while the member table is locked.
    fn spawn_member(
        self: &Arc<Self>,
        state: &mut ClusterState,
        port: u16,
    ) -> Result<Option<u32>, ClusterError> {
        let command = self.config.command();
        let child = command
            .command_for(port)
            .spawn()
            .map_err(|source| ClusterError::Spawn {
                port,
                program: command.program().to_string(),
                source,
            })?;

        let pid = child.id();
        state.next_generation += 1;
        let generation = state.next_generation;
        let started_at = Instant::now();
        let kill = CancellationToken::new();

        let monitor = tokio::spawn(Arc::clone(self).monitor(
            child,
            port,
            generation,
            started_at,
            kill.clone(),
        ));
        state.members.insert(
            port,
            ClusterMember::new(port, pid, generation, started_at, kill, monitor),
        );

        tracing::info!(port, pid = ?pid, generation, "Spawned cluster member");
        Ok(pid)
    }

    /// Drain the member's output until both pipes close, then reap it.
    ///
    /// Cancelling `kill` SIGKILLs the process at any point.
    async fn monitor(
        self: Arc<Self>,
        mut child: Child,
        port: u16,
        generation: u64,
        started_at: Instant,
        kill: CancellationToken,
    ) {
        let pid = child.id();
        let mut forwarders = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.spawn(forward(stdout, port, OutputStream::Stdout, Arc::clone(&self.sink)));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.spawn(forward(stderr, port, OutputStream::Stderr, Arc::clone(&self.sink)));
        }

        tokio::select! {
            _ = async { while forwarders.join_next().await.is_some() {} } => {}
            _ = kill.cancelled() => {}
        }

        // A member may close its pipes and keep running, so the kill token
        // stays live until the process is reaped.
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(port, pid = ?pid, error = %e, "Failed to kill cluster member");
                }
                child.wait().await
            }
        };

        let exit_code = match status {
            Ok(status) => {
                if let Some(signal) = status.signal() {
                    tracing::debug!(port, pid = ?pid, signal, "Cluster member terminated by signal");
                }
                status.code()
            }
            Err(e) => {
                tracing::warn!(port, pid = ?pid, error = %e, "Failed to reap cluster member");
                None
            }
        };

        self.on_member_died(port, generation, pid, exit_code, started_at.elapsed())
            .await;
    }

    /// Handle a member exit: forget it, then respawn or escalate.
    async fn on_member_died(
        self: &Arc<Self>,
        port: u16,
        generation: u64,
        pid: Option<u32>,
        exit_code: Option<i32>,
        lifetime: Duration,
    ) {
        let mut events = vec![Event::member_exited(port, pid, exit_code, lifetime)];
        let mut escalate = false;
        {
            let mut state = self.control.state.lock().await;

            let tracked = state
                .members
                .get(&port)
                .is_some_and(|m| m.generation() == generation);
            if !tracked {
                tracing::debug!(port, pid = ?pid, generation, "Exit of untracked cluster member");
            } else {
                state.members.remove(&port);

                let minimum = self.config.minimum_survival();
                if self.control.is_shutting_down() {
                    tracing::debug!(port, pid = ?pid, "Cluster member exited during shutdown");
                } else if lifetime < minimum {
                    tracing::error!(
                        port,
                        pid = ?pid,
                        exit_code = ?exit_code,
                        lifetime = ?lifetime,
                        minimum_survival = ?minimum,
                        "Cluster member died too soon after start, shutting down cluster"
                    );
                    state.failure = Some(Failure::FatalCrash { port, lifetime });
                    self.control.shutting_down.store(true, Ordering::SeqCst);
                    escalate = true;
                } else {
                    tracing::warn!(
                        port,
                        pid = ?pid,
                        exit_code = ?exit_code,
                        lifetime = ?lifetime,
                        "Cluster member died, respawning"
                    );
                    match self.spawn_member(&mut state, port) {
                        Ok(new_pid) => events.push(Event::member_spawned(port, new_pid, true)),
                        Err(e) => {
                            tracing::error!(port, error = %e, "Failed to respawn cluster member");
                            state.failure = Some(Failure::SpawnFailed(e));
                            self.control.shutting_down.store(true, Ordering::SeqCst);
                            escalate = true;
                        }
                    }
                }
            }
        }
        self.emit_all(events).await;

        // Only wake the shutdown path once this exit has been reported.
        if escalate {
            self.control.stop.cancel();
        }
    }

    async fn emit_all(&self, events: Vec<Event>) {
        for event in events {
            self.event_bus.emit(event).await;
        }
    }
}

/// Copy lines from a member pipe to the sink until EOF.
async fn forward<R>(reader: R, port: u16, stream: OutputStream, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.write_line(port, stream, &line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(port, stream = %stream, error = %e, "Failed to read cluster member output");
                break;
            }
        }
    }
}
