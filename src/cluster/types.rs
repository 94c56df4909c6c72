//! Cluster errors and outcomes.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the cluster supervisor.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The configuration cannot describe a working cluster.
    #[error("invalid cluster config: {0}")]
    InvalidConfig(String),

    /// `start` was called on a cluster that already ran.
    #[error("cluster already started")]
    AlreadyStarted,

    /// A worker process could not be launched.
    #[error("failed to spawn worker `{program}` on port {port}: {source}")]
    Spawn {
        port: u16,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A signal could not be delivered to a worker.
    #[error("failed to signal worker pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },
}

/// How a cluster run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    /// An external stop was requested and every member was shut down.
    Stopped,
    /// A member died before its minimum survival time; the whole cluster was
    /// torn down instead of respawning it.
    FatalCrash { port: u16, lifetime: Duration },
}
