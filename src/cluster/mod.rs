//! Supervision of a pool of worker processes.
//!
//! A [`Cluster`] keeps `pool_size` copies of a worker program running, each
//! launched with `--port <n>` for consecutive ports after the base port. A
//! member that dies after its minimum survival time is respawned on the same
//! port. A member that dies sooner takes the whole cluster down with it.

mod config;
mod member;
mod sink;
mod supervisor;
mod types;

pub use config::{
    ClusterConfig, DEFAULT_BASE_PORT, DEFAULT_MINIMUM_SURVIVAL, DEFAULT_SHUTDOWN_TIMEOUT,
    WorkerCommand,
};
pub use member::{ClusterMember, MemberSnapshot};
pub use sink::{OutputSink, OutputStream, TracingSink};
pub use supervisor::{Cluster, ClusterHandle};
pub use types::{ClusterError, ClusterOutcome};
