//! A single worker process in the pool.

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::ClusterError;

/// A live worker process and the task watching it.
///
/// Owned by the supervisor's member table. The member is removed from the
/// table when its monitor task observes the process exit.
#[derive(Debug)]
pub struct ClusterMember {
    port: u16,
    pid: Option<u32>,
    generation: u64,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    /// Cancelled to make the monitor SIGKILL the process.
    kill: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

/// Point-in-time view of a member, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub port: u16,
    pub pid: Option<u32>,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
}

impl ClusterMember {
    pub(crate) fn new(
        port: u16,
        pid: Option<u32>,
        generation: u64,
        started_at: Instant,
        kill: CancellationToken,
        monitor: JoinHandle<()>,
    ) -> Self {
        Self {
            port,
            pid,
            generation,
            started_at,
            started_at_utc: Utc::now(),
            kill,
            monitor: Some(monitor),
        }
    }

    /// Port the member was told to bind.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// OS process id, if the process was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawn sequence number, unique within a cluster.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How long the member has been running.
    pub fn lifetime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            port: self.port,
            pid: self.pid,
            generation: self.generation,
            started_at: self.started_at_utc,
        }
    }

    /// Send SIGTERM to the member process.
    pub fn terminate(&self) -> Result<(), ClusterError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let raw = i32::try_from(pid).map_err(|_| ClusterError::Signal {
            pid,
            source: nix::errno::Errno::EINVAL,
        })?;
        signal::kill(Pid::from_raw(raw), Signal::SIGTERM)
            .map_err(|source| ClusterError::Signal { pid, source })
    }

    /// Stop the member and wait for its monitor to see the exit.
    ///
    /// Sends SIGTERM and waits up to `timeout`. A member still running after
    /// that is killed and waited on once more. Failures are logged, never
    /// returned.
    pub async fn die(mut self, timeout: Duration) {
        let port = self.port;
        let pid = self.pid;

        if let Err(e) = self.terminate() {
            // ESRCH here just means the process already exited.
            tracing::debug!(port, pid = ?pid, error = %e, "Could not signal cluster member");
        }

        let Some(mut monitor) = self.monitor.take() else {
            return;
        };

        match tokio::time::timeout(timeout, &mut monitor).await {
            Ok(Ok(())) => {
                tracing::debug!(port, pid = ?pid, "Cluster member exited");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(port, pid = ?pid, error = %e, "Cluster member monitor failed");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    port,
                    pid = ?pid,
                    timeout = ?timeout,
                    "Cluster member ignored SIGTERM, killing"
                );
            }
        }

        self.kill.cancel();
        match tokio::time::timeout(timeout, monitor).await {
            Ok(Ok(())) => tracing::debug!(port, pid = ?pid, "Cluster member killed"),
            Ok(Err(e)) => {
                tracing::warn!(port, pid = ?pid, error = %e, "Cluster member monitor failed")
            }
            Err(_) => tracing::error!(port, pid = ?pid, "Cluster member did not exit after SIGKILL"),
        }
    }
}
