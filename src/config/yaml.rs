//! YAML configuration parsing.
//!
//! Parses job files and the global configuration (`jobvisor.yaml`).

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use crate::cluster::{
    ClusterConfig, DEFAULT_BASE_PORT, DEFAULT_MINIMUM_SURVIVAL, DEFAULT_SHUTDOWN_TIMEOUT,
    WorkerCommand,
};
use crate::core::environment::Environment;
use crate::core::frequency::{Frequency, TimeOfDay, parse_timezone};

/// Default glob for job file discovery.
pub const DEFAULT_JOB_PATTERN: &str = "tools/*/jobs.yaml";

/// Global configuration (jobvisor.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Job calendar settings.
    pub scheduler: SchedulerConfig,
    /// Worker cluster settings.
    pub cluster: Option<ClusterSettings>,
}

/// Job calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Glob matching job files, relative to the root directory.
    pub job_pattern: String,
    /// IANA timezone the recurrence rules are evaluated in.
    pub timezone: Option<String>,
    /// Environment variables for every job command.
    pub environment: HashMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            job_pattern: DEFAULT_JOB_PATTERN.to_string(),
            timezone: None,
            environment: HashMap::new(),
        }
    }
}

/// Worker cluster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Members bind to `base_port + 1` onwards.
    pub base_port: u16,
    /// Number of members.
    pub pool_size: usize,
    /// Worker program.
    pub program: Option<String>,
    /// Worker arguments, before `--port <n>`.
    pub args: Vec<String>,
    /// Environment variables for every member.
    pub environment: HashMap<String, String>,
    /// Working directory for every member.
    pub working_dir: Option<PathBuf>,
    /// A member dying sooner than this is fatal.
    pub minimum_survival_secs: u64,
    /// Time a member gets to exit after SIGTERM.
    pub shutdown_timeout_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            pool_size: 1,
            program: None,
            args: Vec::new(),
            environment: HashMap::new(),
            working_dir: None,
            minimum_survival_secs: DEFAULT_MINIMUM_SURVIVAL.as_secs(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}

impl GlobalConfig {
    /// The calendar timezone, UTC when unset.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        match &self.scheduler.timezone {
            Some(name) => {
                parse_timezone(name).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
            }
            None => Ok(chrono_tz::UTC),
        }
    }

    /// Environment shared by every job command.
    pub fn job_environment(&self) -> Environment {
        Environment::from_map(self.scheduler.environment.clone())
    }

    /// Build a cluster configuration from the `cluster` section.
    ///
    /// `program` overrides the configured program when given.
    pub fn cluster_config(&self, program: Option<&str>) -> Result<ClusterConfig, ConfigError> {
        let settings = self.cluster.clone().unwrap_or_default();
        let program = program
            .map(str::to_string)
            .or(settings.program)
            .ok_or_else(|| ConfigError::MissingField("cluster.program".into()))?;

        let mut command = WorkerCommand::new(program)
            .with_args(settings.args)
            .with_environment(Environment::from_map(settings.environment));
        if let Some(dir) = settings.working_dir {
            command = command.with_working_dir(dir);
        }

        let config = ClusterConfig::new(command)
            .with_base_port(settings.base_port)
            .with_pool_size(settings.pool_size)
            .with_minimum_survival(Duration::from_secs(settings.minimum_survival_secs))
            .with_shutdown_timeout(Duration::from_secs(settings.shutdown_timeout_secs));
        config
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }
}

/// A job file: one or more jobs declared together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFileConfig {
    /// Jobs in declaration order.
    #[serde(default)]
    pub jobs: Vec<JobEntryConfig>,
}

/// One job declared in a job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntryConfig {
    /// Job name, unique within the file.
    pub name: String,
    /// Recurrence rule (`hourly`, `daily`, `weekday`, `weekly`, `monthly`
    /// or a day name).
    pub every: String,
    /// Time of day, `"HHMM"` or `"HH:MM"`.
    pub at: Option<TimeOfDayConfig>,
    /// The command to run.
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for this job.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Working directory.
    pub working_dir: Option<String>,
    /// Timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// A time of day as written in YAML.
///
/// An unquoted `at: 0800` arrives as the integer 800.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeOfDayConfig {
    Text(String),
    Number(u32),
}

impl TimeOfDayConfig {
    /// The value in `HHMM`/`HH:MM` text form.
    pub fn as_text(&self) -> String {
        match self {
            TimeOfDayConfig::Text(s) => s.clone(),
            TimeOfDayConfig::Number(n) => format!("{:04}", n),
        }
    }
}

impl JobEntryConfig {
    /// Parsed recurrence rule.
    pub fn frequency(&self) -> Result<Frequency, ConfigError> {
        self.every.parse().map_err(|e| {
            ConfigError::InvalidConfig(format!("job '{}': {}", self.name, e))
        })
    }

    /// Parsed time of day, if given.
    pub fn time_of_day(&self) -> Result<Option<TimeOfDay>, ConfigError> {
        self.at
            .as_ref()
            .map(|at| at.as_text().parse::<TimeOfDay>())
            .transpose()
            .map_err(|e| ConfigError::InvalidConfig(format!("job '{}': {}", self.name, e)))
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::parse_global_config(&content).map_err(|e| e.in_file(path))
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    /// Load a job file.
    pub fn load_job_file(path: impl AsRef<Path>) -> Result<JobFileConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::parse_job_file(&content).map_err(|e| e.in_file(path))
    }

    /// Parse a job file from a YAML string.
    pub fn parse_job_file(yaml: &str) -> Result<JobFileConfig, ConfigError> {
        // An empty document is a file with no jobs.
        if yaml.trim().is_empty() {
            return Ok(JobFileConfig::default());
        }
        let config: JobFileConfig = serde_yaml::from_str(yaml)?;
        Self::validate_job_file(&config)?;
        Ok(config)
    }

    fn validate_global_config(config: &GlobalConfig) -> Result<(), ConfigError> {
        if config.scheduler.job_pattern.trim().is_empty() {
            return Err(ConfigError::MissingField("scheduler.job_pattern".into()));
        }

        config.timezone()?;

        if let Some(cluster) = &config.cluster {
            if cluster.pool_size == 0 {
                return Err(ConfigError::InvalidConfig(
                    "cluster.pool_size must be at least 1".into(),
                ));
            }
            if cluster.shutdown_timeout_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "cluster.shutdown_timeout_secs cannot be zero".into(),
                ));
            }
        }

        Ok(())
    }

    /// Validate a job file. Any bad entry rejects the whole file.
    fn validate_job_file(config: &JobFileConfig) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for job in &config.jobs {
            if job.name.trim().is_empty() {
                return Err(ConfigError::MissingField("name".into()));
            }

            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate job name: {}",
                    job.name
                )));
            }

            if job.command.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "job '{}' has an empty command",
                    job.name
                )));
            }

            if job.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "job '{}': timeout_secs cannot be zero",
                    job.name
                )));
            }

            job.frequency()?;
            job.time_of_day()?;
        }

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}
