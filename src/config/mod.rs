//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for job files and global
//! settings, and discovery of job files by glob pattern.

mod builder;
mod error;
mod yaml;

pub use builder::{
    JobConfigBuilder, JobLoadReport, LoadedFile, discover_job_files, load_job_file, load_jobs,
};
pub use error::ConfigError;
pub use yaml::{
    ClusterSettings, DEFAULT_JOB_PATTERN, GlobalConfig, JobEntryConfig, JobFileConfig,
    SchedulerConfig, TimeOfDayConfig, YamlLoader,
};
