//! Job registration from YAML job files.
//!
//! This module turns job file entries into [`CommandAction`]s on a
//! [`JobCalendar`] and discovers job files by glob pattern.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::calendar::JobCalendar;
use crate::core::environment::Environment;
use crate::core::job::JobAction;
use crate::core::types::SourceLocation;
use crate::execution::CommandAction;

use super::error::ConfigError;
use super::yaml::{JobEntryConfig, JobFileConfig, YamlLoader};

/// Builder for creating job actions from YAML configuration.
pub struct JobConfigBuilder;

impl JobConfigBuilder {
    /// Build the command action for a job entry.
    ///
    /// `environment` is the shared environment; the entry's own variables
    /// take precedence.
    pub fn build_action(entry: &JobEntryConfig, environment: &Environment) -> Arc<dyn JobAction> {
        let env = environment.merged_with(&Environment::from_map(entry.environment.clone()));
        let mut builder = CommandAction::builder(&entry.command)
            .args(entry.args.iter().cloned())
            .environment(env);

        if let Some(dir) = &entry.working_dir {
            builder = builder.working_dir(dir);
        }

        if let Some(secs) = entry.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Arc::new(builder.build())
    }

    /// Register every job of an already validated file on `calendar`.
    ///
    /// Returns the number of jobs registered.
    pub fn register(
        config: &JobFileConfig,
        path: &Path,
        calendar: &mut JobCalendar,
        environment: &Environment,
    ) -> Result<usize, ConfigError> {
        // Parse every rule first so a bad entry registers nothing.
        let mut schedules = Vec::with_capacity(config.jobs.len());
        for entry in &config.jobs {
            schedules.push((entry.frequency()?, entry.time_of_day()?));
        }

        for (index, (entry, (frequency, time_of_day))) in
            config.jobs.iter().zip(schedules).enumerate()
        {
            let action = Self::build_action(entry, environment);
            calendar.schedule_job(
                &entry.name,
                SourceLocation::file(path, Some(index)),
                action,
                frequency,
                time_of_day,
            );
        }

        Ok(config.jobs.len())
    }
}

/// A job file that loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub jobs: usize,
}

/// What happened to each job file matched during discovery.
#[derive(Debug, Default)]
pub struct JobLoadReport {
    /// Files whose jobs were all registered.
    pub loaded: Vec<LoadedFile>,
    /// Files rejected as a whole, with the reason.
    pub failed: Vec<(PathBuf, ConfigError)>,
}

impl JobLoadReport {
    /// Total jobs registered.
    pub fn jobs_loaded(&self) -> usize {
        self.loaded.iter().map(|f| f.jobs).sum()
    }

    /// Whether any file failed to load.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Job files matching `pattern` under `root`, in sorted order.
pub fn discover_job_files(pattern: &str, root: impl AsRef<Path>) -> Result<Vec<PathBuf>, ConfigError> {
    let full = root.as_ref().join(pattern);
    let full = full.to_string_lossy();
    let paths = glob::glob(&full).map_err(|source| ConfigError::PatternError {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => {
                let path = e.path().to_path_buf();
                return Err(ConfigError::GlobError {
                    path,
                    source: e.into(),
                });
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Load one job file onto `calendar`.
///
/// The file is validated as a whole before anything is registered.
pub fn load_job_file(
    path: impl AsRef<Path>,
    calendar: &mut JobCalendar,
    environment: &Environment,
) -> Result<usize, ConfigError> {
    let path = path.as_ref();
    let config = YamlLoader::load_job_file(path)?;
    JobConfigBuilder::register(&config, path, calendar, environment).map_err(|e| e.in_file(path))
}

/// Discover job files and load each one in isolation.
///
/// A file that fails to load is logged and recorded in the report; the other
/// files still load. Only an invalid pattern is an error.
pub fn load_jobs(
    pattern: &str,
    root: impl AsRef<Path>,
    calendar: &mut JobCalendar,
    environment: &Environment,
) -> Result<JobLoadReport, ConfigError> {
    let files = discover_job_files(pattern, root)?;
    let mut report = JobLoadReport::default();

    for path in files {
        match load_job_file(&path, calendar, environment) {
            Ok(jobs) => {
                tracing::info!(source = %path.display(), jobs, "Loaded job file");
                report.loaded.push(LoadedFile { path, jobs });
            }
            Err(e) => {
                tracing::error!(source = %path.display(), error = %e, "Failed to load job file");
                report.failed.push((path, e));
            }
        }
    }

    if report.loaded.is_empty() && report.failed.is_empty() {
        tracing::warn!(pattern, "No job files matched");
    }

    Ok(report)
}
