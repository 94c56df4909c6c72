//! End-to-end tests from YAML files to running jobs.

use chrono::{TimeZone, Utc};
use jobvisor::testing::SimulatedClock;
use jobvisor::{
    ConfigError, Frequency, JobCalendar, RunOutcome, YamlLoader, action_fn, load_jobs,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

const APPEND_JOBS: &str = r#"
jobs:
  - name: append
    every: hourly
    command: sh
    args: ["-c", "echo \"$TAG\" >> \"$OUT\""]
    environment:
      TAG: tick
"#;

const BROKEN_JOBS: &str = r#"
jobs:
  - name: fine
    every: daily
    command: "true"
  - name: nonsense
    every: fortnightly
    command: "true"
"#;

#[tokio::test]
async fn test_job_files_run_under_simulated_time() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.txt");
    write(
        dir.path(),
        "jobvisor.yaml",
        &format!(
            "scheduler:\n  environment:\n    OUT: \"{}\"\n",
            out.display()
        ),
    );
    write(dir.path(), "tools/append/jobs.yaml", APPEND_JOBS);
    write(dir.path(), "tools/broken/jobs.yaml", BROKEN_JOBS);

    let global = YamlLoader::load_global_config(dir.path().join("jobvisor.yaml")).unwrap();
    assert_eq!(global.scheduler.job_pattern, "tools/*/jobs.yaml");

    let clock = Arc::new(SimulatedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
    ));
    let mut calendar = JobCalendar::new()
        .with_clock(clock.clone())
        .with_timezone(global.timezone().unwrap());

    let report = load_jobs(
        &global.scheduler.job_pattern,
        dir.path(),
        &mut calendar,
        &global.job_environment(),
    )
    .unwrap();

    // The broken file is rejected whole; its valid entry is not registered.
    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.jobs_loaded(), 1);
    assert!(report.has_failures());
    assert!(report.failed[0].0.ends_with("tools/broken/jobs.yaml"));
    assert!(report.failed[0].1.to_string().contains("fortnightly"));
    assert_eq!(
        calendar.jobs().iter().map(|j| j.name()).collect::<Vec<_>>(),
        vec!["append"]
    );
    assert!(
        calendar.jobs()[0]
            .source()
            .to_string()
            .contains("tools/append/jobs.yaml")
    );

    let stop = calendar.stop_handle();
    let noon = Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap();
    let now = clock.clone();
    calendar.schedule_job(
        "stopper",
        "inline",
        action_fn(move || {
            if now.now() >= noon {
                stop.request_stop();
            }
            Ok(())
        }),
        Frequency::Hourly,
        None,
    );

    assert_eq!(calendar.run().await, RunOutcome::Stopped);

    // 10:00 and 11:00.
    let written = fs::read_to_string(&out).unwrap();
    assert_eq!(written.lines().collect::<Vec<_>>(), vec!["tick", "tick"]);
}

#[tokio::test]
async fn test_invalid_pattern_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut calendar = JobCalendar::new();

    let result = load_jobs("tools/[/jobs.yaml", dir.path(), &mut calendar, &Default::default());

    assert!(matches!(result, Err(ConfigError::PatternError { .. })));
    assert!(calendar.is_empty());
}

#[tokio::test]
async fn test_no_matching_files_loads_nothing() {
    let dir = TempDir::new().unwrap();
    let mut calendar = JobCalendar::new();

    let report = load_jobs("tools/*/jobs.yaml", dir.path(), &mut calendar, &Default::default()).unwrap();

    assert_eq!(report.jobs_loaded(), 0);
    assert!(!report.has_failures());
    assert_eq!(calendar.run().await, RunOutcome::NothingToRun);
}

#[test]
fn test_cluster_section_builds_a_valid_config() {
    let global = YamlLoader::parse_global_config(
        r#"
cluster:
  base_port: 8000
  pool_size: 4
  program: ./server
  args: ["--quiet"]
  minimum_survival_secs: 5
"#,
    )
    .unwrap();

    let config = global.cluster_config(None).unwrap();
    assert_eq!(config.ports().collect::<Vec<_>>(), vec![8001, 8002, 8003, 8004]);
    assert_eq!(config.command().args_for(8001), vec!["--quiet", "--port", "8001"]);

    let overridden = global.cluster_config(Some("./other")).unwrap();
    assert_eq!(overridden.command().program(), "./other");

    let missing = YamlLoader::parse_global_config("cluster:\n  pool_size: 2\n").unwrap();
    assert!(matches!(
        missing.cluster_config(None),
        Err(ConfigError::MissingField(_))
    ));
}
