//! jobvisor - a recurring job calendar and a worker cluster supervisor.
//!
//! Two background components share this crate:
//!
//! - [`JobCalendar`] runs registered jobs on coarse recurrence rules
//!   (hourly, daily, weekdays, weekly, monthly, a named day), one job at a
//!   time, earliest first, isolating each job's failures.
//! - [`Cluster`] keeps a fixed pool of worker processes alive on sequential
//!   ports, respawning members that crash and tearing the pool down when a
//!   member dies too soon after starting.
//!
//! Job files are YAML and discovered by glob pattern; see [`config`].

pub mod calendar;
pub mod cluster;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod shutdown;
pub mod testing;

pub use calendar::{CalendarError, Clock, JobCalendar, RunOutcome, StopHandle, SystemClock};
pub use cluster::{
    Cluster, ClusterConfig, ClusterError, ClusterHandle, ClusterMember, ClusterOutcome,
    MemberSnapshot, OutputSink, OutputStream, TracingSink, WorkerCommand,
};
pub use config::{
    ConfigError, GlobalConfig, JobFileConfig, JobLoadReport, YamlLoader, load_job_file, load_jobs,
};
pub use crate::core::environment::Environment;
pub use crate::core::frequency::{Frequency, FrequencyError, TimeOfDay, parse_timezone};
pub use crate::core::job::{ActionError, FnAction, Job, JobAction, action_fn};
pub use crate::core::types::{RunId, SourceLocation};
pub use events::{Event, EventBus, EventHandler, ShutdownReason};
pub use execution::{CommandAction, CommandActionBuilder};
pub use shutdown::install_shutdown_handler;
