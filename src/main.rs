//! jobvisor - recurring jobs and a supervised worker pool.
//!
//! Usage:
//!   jobvisor run                 Run the job calendar until SIGTERM/SIGINT
//!   jobvisor validate            Validate every job file
//!   jobvisor list                List loaded jobs and their next runs
//!   jobvisor trigger <JOB>       Run one job now
//!   jobvisor cluster -- <CMD>    Supervise a pool of worker processes

use clap::{Args, Parser, Subcommand};
use jobvisor::{
    Cluster, ClusterOutcome, Event, EventBus, EventHandler, GlobalConfig, JobCalendar,
    JobLoadReport, RunOutcome, ShutdownReason, YamlLoader, install_shutdown_handler, load_jobs,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Config file picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "jobvisor.yaml";

/// jobvisor - recurring jobs and a supervised worker pool
#[derive(Parser)]
#[command(name = "jobvisor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the global configuration file
    #[arg(short, long, global = true, env = "JOBVISOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where job files come from.
#[derive(Args)]
struct JobSourceArgs {
    /// Directory the job pattern is relative to
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Glob matching job files (default: scheduler.job_pattern)
    #[arg(long)]
    pattern: Option<String>,

    /// IANA timezone for recurrence rules (default: scheduler.timezone)
    #[arg(long)]
    timezone: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job calendar until stopped
    Run {
        #[command(flatten)]
        source: JobSourceArgs,
    },

    /// Validate job files without running them
    Validate {
        #[command(flatten)]
        source: JobSourceArgs,
    },

    /// List loaded jobs and their next runs
    List {
        #[command(flatten)]
        source: JobSourceArgs,
    },

    /// Run a single job now (one-shot execution)
    Trigger {
        #[command(flatten)]
        source: JobSourceArgs,

        /// Name of the job to run
        #[arg(value_name = "JOB")]
        job: String,
    },

    /// Supervise a pool of worker processes
    Cluster {
        /// Members bind to BASE_PORT + 1 onwards
        #[arg(long)]
        base_port: Option<u16>,

        /// Number of members
        #[arg(short = 'n', long)]
        pool_size: Option<usize>,

        /// A member dying sooner than this shuts the cluster down
        #[arg(long)]
        minimum_survival_secs: Option<u64>,

        /// Time a member gets to exit after SIGTERM
        #[arg(long)]
        shutdown_timeout_secs: Option<u64>,

        /// Worker program and arguments (default: cluster.program)
        #[arg(last = true, value_name = "WORKER")]
        worker: Vec<String>,
    },
}

/// Event handler that logs lifecycle events for operators.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobStarted { job, run_id, .. } => {
                debug!("Job '{}' started (run: {})", job, run_id);
            }
            Event::JobCompleted {
                job,
                run_id,
                duration,
                ..
            } => {
                debug!("Job '{}' completed in {:?} (run: {})", job, duration, run_id);
            }
            Event::JobFailed {
                job,
                source,
                run_id,
                error,
                duration,
                ..
            } => {
                warn!(
                    "Job '{}' from {} failed after {:?} (run: {}): {}",
                    job, source, duration, run_id, error
                );
            }
            Event::MemberSpawned {
                port,
                pid,
                replacement,
                ..
            } => {
                let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
                if *replacement {
                    info!("Member on port {} replaced (pid: {})", port, pid);
                } else {
                    debug!("Member on port {} started (pid: {})", port, pid);
                }
            }
            Event::MemberExited {
                port,
                exit_code,
                lifetime,
                ..
            } => {
                let exit_info = exit_code
                    .map(|c| format!(" (exit: {})", c))
                    .unwrap_or_default();
                info!("Member on port {} exited after {:?}{}", port, lifetime, exit_info);
            }
            Event::ClusterShutdown { reason, .. } => match reason {
                ShutdownReason::Requested => info!("Cluster shutting down on request"),
                ShutdownReason::FatalCrash { port, lifetime } => error!(
                    "Cluster shutting down: member on port {} died after {:?}",
                    port, lifetime
                ),
                ShutdownReason::SpawnFailed { port } => error!(
                    "Cluster shutting down: member on port {} could not be launched",
                    port
                ),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_global_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { source } => {
            run_calendar(config, source).await?;
        }
        Commands::Validate { source } => {
            validate_jobs(config, source).await?;
        }
        Commands::List { source } => {
            list_jobs(config, source).await?;
        }
        Commands::Trigger { source, job } => {
            trigger_job(config, source, job).await?;
        }
        Commands::Cluster {
            base_port,
            pool_size,
            minimum_survival_secs,
            shutdown_timeout_secs,
            worker,
        } => {
            let mut config = config;
            let settings = config.cluster.get_or_insert_with(Default::default);
            if let Some(port) = base_port {
                settings.base_port = port;
            }
            if let Some(size) = pool_size {
                settings.pool_size = size;
            }
            if let Some(secs) = minimum_survival_secs {
                settings.minimum_survival_secs = secs;
            }
            if let Some(secs) = shutdown_timeout_secs {
                settings.shutdown_timeout_secs = secs;
            }
            if let Some((program, args)) = worker.split_first() {
                settings.program = Some(program.clone());
                settings.args = args.to_vec();
            }
            run_cluster(config).await?;
        }
    }

    Ok(())
}

/// Load the global config from `path`, or from `jobvisor.yaml` if present.
fn load_global_config(path: Option<&Path>) -> Result<GlobalConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            Ok(YamlLoader::load_global_config(path)?)
        }
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            info!("Loading config from: {}", DEFAULT_CONFIG_FILE);
            Ok(YamlLoader::load_global_config(DEFAULT_CONFIG_FILE)?)
        }
        None => Ok(GlobalConfig::default()),
    }
}

/// Build a calendar and load every job file onto it.
async fn load_calendar(
    mut config: GlobalConfig,
    source: &JobSourceArgs,
) -> Result<(JobCalendar, JobLoadReport), Box<dyn std::error::Error>> {
    if let Some(pattern) = &source.pattern {
        config.scheduler.job_pattern = pattern.clone();
    }
    if let Some(timezone) = &source.timezone {
        config.scheduler.timezone = Some(timezone.clone());
    }

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut calendar = JobCalendar::new()
        .with_timezone(config.timezone()?)
        .with_event_bus(event_bus);

    info!(
        "Loading jobs matching '{}' under {}",
        config.scheduler.job_pattern,
        source.root.display()
    );
    let report = load_jobs(
        &config.scheduler.job_pattern,
        &source.root,
        &mut calendar,
        &config.job_environment(),
    )?;

    Ok((calendar, report))
}

/// Run the job calendar until a signal arrives.
async fn run_calendar(
    config: GlobalConfig,
    source: JobSourceArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut calendar, report) = load_calendar(config, &source).await?;

    info!(
        "Loaded {} job(s) from {} file(s), {} file(s) failed",
        report.jobs_loaded(),
        report.loaded.len(),
        report.failed.len()
    );
    for job in calendar.jobs() {
        info!(
            "  - {} ({} at {}): next run {}",
            job.name(),
            job.frequency(),
            job.time_of_day(),
            job.next_run_at()
        );
    }

    let shutdown = install_shutdown_handler()?;
    let stop = calendar.stop_handle();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        stop.request_stop();
    });

    info!("Starting calendar...");
    let task = tokio::spawn(async move { calendar.run().await });

    match task.await {
        Ok(RunOutcome::Stopped) => info!("Calendar stopped cleanly"),
        Ok(RunOutcome::NothingToRun) => warn!("No jobs to run, exiting"),
        Err(e) => {
            error!("Calendar terminated abnormally: {}", e);
            return Err(e.into());
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate job files without running them.
async fn validate_jobs(
    config: GlobalConfig,
    source: JobSourceArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_calendar, report) = load_calendar(config, &source).await?;

    for file in &report.loaded {
        info!("  - {}: {} job(s) OK", file.path.display(), file.jobs);
    }
    for (path, e) in &report.failed {
        error!("  - {}: {}", path.display(), e);
    }

    if report.has_failures() {
        return Err(format!("{} job file(s) failed validation", report.failed.len()).into());
    }

    info!(
        "All {} job file(s) are valid ({} job(s))",
        report.loaded.len(),
        report.jobs_loaded()
    );
    Ok(())
}

/// List loaded jobs and their next runs.
async fn list_jobs(
    config: GlobalConfig,
    source: JobSourceArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let timezone = match &source.timezone {
        Some(name) => jobvisor::parse_timezone(name)?,
        None => config.timezone()?,
    };
    let (calendar, report) = load_calendar(config, &source).await?;

    for (path, e) in &report.failed {
        warn!("Skipped {}: {}", path.display(), e);
    }

    if calendar.is_empty() {
        println!("No jobs found under {}", source.root.display());
        return Ok(());
    }

    println!("Jobs under {}:", source.root.display());
    println!();

    for job in calendar.jobs() {
        println!("Name: {}", job.name());
        println!("  Every: {}", job.frequency());
        if job.frequency() != jobvisor::Frequency::Hourly {
            println!("  At: {}", job.time_of_day());
        }
        println!("  Source: {}", job.source());
        println!("  Next run: {}", job.next_run_at().with_timezone(&timezone));
        if let Some(description) = job.action().description() {
            println!("  Command: {}", description);
        }
        println!();
    }

    Ok(())
}

/// Run a single job now.
async fn trigger_job(
    config: GlobalConfig,
    source: JobSourceArgs,
    job: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut calendar, _report) = load_calendar(config, &source).await?;

    if calendar.job(&job).is_none() {
        error!("Job '{}' not found", job);
        error!(
            "Available jobs: {}",
            calendar
                .jobs()
                .iter()
                .map(|j| j.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Err(format!("Job '{}' not found", job).into());
    }

    info!("Triggering job '{}'...", job);
    calendar.trigger(&job).await?;
    info!("Done!");
    Ok(())
}

/// Supervise the worker pool until a signal arrives or a member dies too soon.
async fn run_cluster(config: GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cluster_config = config.cluster_config(None)?;

    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let cluster = Cluster::new(cluster_config)?.with_event_bus(event_bus);
    let handle = cluster.handle();

    let shutdown = install_shutdown_handler()?;
    tokio::spawn(async move {
        shutdown.cancelled().await;
        handle.stop();
    });

    match cluster.start().await? {
        ClusterOutcome::Stopped => {
            info!("Cluster stopped");
            Ok(())
        }
        ClusterOutcome::FatalCrash { port, lifetime } => {
            error!(
                "Cluster stopped: member on port {} died after {:?}",
                port, lifetime
            );
            Err(format!("cluster member on port {} crashed on startup", port).into())
        }
    }
}
