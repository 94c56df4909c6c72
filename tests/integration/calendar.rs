//! Job calendar integration tests.
//!
//! Drives the calendar through days of simulated time and checks dispatch
//! order, fault isolation and stop behavior.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use jobvisor::testing::{CountingAction, FailingAction, RecordingHandler, SimulatedClock};
use jobvisor::{EventBus, Frequency, JobCalendar, RunOutcome, TimeOfDay, action_fn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Action that records `(name, clock time)` every time it runs.
fn recorder(
    name: &'static str,
    clock: Arc<SimulatedClock>,
    log: Arc<Mutex<Vec<(&'static str, DateTime<Utc>)>>>,
) -> Arc<dyn jobvisor::JobAction> {
    action_fn(move || {
        log.lock().unwrap().push((name, clock.now()));
        Ok(())
    })
}

/// Register a job that stops the calendar once the clock reaches `at`.
fn stop_at(calendar: &mut JobCalendar, clock: Arc<SimulatedClock>, at: DateTime<Utc>) {
    let stop = calendar.stop_handle();
    calendar.schedule_job(
        "stopper",
        "inline",
        action_fn(move || {
            if clock.now() >= at {
                stop.request_stop();
            }
            Ok(())
        }),
        Frequency::Hourly,
        None,
    );
}

#[tokio::test]
async fn test_dispatch_over_a_weekend_is_monotonic() {
    // Friday 17:00
    let clock = Arc::new(SimulatedClock::new(utc(2024, 1, 19, 17, 0)));
    let mut calendar = JobCalendar::new().with_clock(clock.clone());
    let log = Arc::new(Mutex::new(Vec::new()));
    let at = |s: &str| Some(s.parse::<TimeOfDay>().unwrap());

    calendar.schedule_job(
        "hourly",
        "inline",
        recorder("hourly", clock.clone(), log.clone()),
        Frequency::Hourly,
        None,
    );
    calendar.schedule_job(
        "daily",
        "inline",
        recorder("daily", clock.clone(), log.clone()),
        Frequency::Daily,
        at("0800"),
    );
    calendar.schedule_job(
        "weekday",
        "inline",
        recorder("weekday", clock.clone(), log.clone()),
        Frequency::Weekday,
        at("0930"),
    );
    calendar.schedule_job(
        "monday",
        "inline",
        recorder("monday", clock.clone(), log.clone()),
        Frequency::On(Weekday::Mon),
        at("0000"),
    );
    calendar.schedule_job(
        "monthly",
        "inline",
        recorder("monthly", clock.clone(), log.clone()),
        Frequency::Monthly,
        None,
    );
    stop_at(&mut calendar, clock.clone(), utc(2024, 1, 22, 10, 0));

    assert_eq!(calendar.run().await, RunOutcome::Stopped);

    let log = log.lock().unwrap().clone();
    assert!(
        log.windows(2).all(|w| w[0].1 <= w[1].1),
        "dispatch times went backwards: {:?}",
        log
    );

    let runs = |name: &str| -> Vec<DateTime<Utc>> {
        log.iter().filter(|(n, _)| *n == name).map(|(_, t)| *t).collect()
    };

    // Friday 18:00 through Monday 10:00.
    assert_eq!(runs("hourly").len(), 6 + 24 + 24 + 11);

    let daily = runs("daily");
    assert_eq!(daily.len(), 3);
    assert!(daily.iter().all(|t| t.hour() == 8));

    // Friday's 09:30 had passed, so the first weekday run is Monday.
    let weekday = runs("weekday");
    assert_eq!(weekday.len(), 1);
    assert_eq!(weekday[0].weekday(), Weekday::Mon);
    assert_eq!((weekday[0].hour(), weekday[0].minute()), (9, 30));

    let monday = runs("monday");
    assert_eq!(monday.len(), 1);
    assert_eq!(monday[0].date_naive(), utc(2024, 1, 22, 0, 0).date_naive());

    assert!(runs("monthly").is_empty());
    let monthly = calendar.jobs().iter().find(|j| j.name() == "monthly").unwrap();
    assert_eq!(monthly.next_run_at(), utc(2024, 2, 1, 0, 0));
}

#[tokio::test]
async fn test_failing_job_never_blocks_sibling() {
    let clock = Arc::new(SimulatedClock::new(utc(2024, 1, 15, 9, 0)));
    let handler = RecordingHandler::new();
    let bus = EventBus::new();
    bus.register(handler.clone()).await;
    let mut calendar = JobCalendar::new()
        .with_clock(clock.clone())
        .with_event_bus(bus);

    let failing = FailingAction::new("database unreachable");
    let counter = CountingAction::new();
    calendar.schedule_job("flaky", "tools/flaky/jobs.yaml#0", failing.clone(), Frequency::Hourly, None);
    calendar.schedule_job("steady", "tools/steady/jobs.yaml#0", counter.clone(), Frequency::Hourly, None);
    stop_at(&mut calendar, clock.clone(), utc(2024, 1, 15, 12, 0));

    assert_eq!(calendar.run().await, RunOutcome::Stopped);

    // Three hours of simulated time: 10:00, 11:00, 12:00.
    assert_eq!(counter.count(), 3);
    assert_eq!(failing.attempts(), 3);

    let flaky = calendar.jobs().iter().find(|j| j.name() == "flaky").unwrap();
    assert_eq!(flaky.run_count(), 3);
    assert_eq!(flaky.next_run_at(), utc(2024, 1, 15, 13, 0));

    let failures = handler.job_failures().await;
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|(job, error)| {
        job == "flaky" && error.contains("database unreachable")
    }));
}

#[tokio::test]
async fn test_repeated_stop_returns_stopped_once() {
    let mut calendar = JobCalendar::new();
    let counter = CountingAction::new();
    calendar.schedule_job("daily", "inline", counter.clone(), Frequency::Daily, None);
    let stop = calendar.stop_handle();

    let task = tokio::spawn(async move {
        let outcome = calendar.run().await;
        (outcome, calendar)
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    stop.request_stop();
    stop.request_stop();

    let (outcome, calendar) = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("calendar should stop promptly")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(counter.count(), 0);

    // Stopping an already stopped calendar is harmless.
    calendar.request_stop();
    assert!(stop.is_stop_requested());
}

#[tokio::test]
async fn test_empty_calendar_reports_nothing_to_run() {
    let mut calendar = JobCalendar::new();
    assert_eq!(calendar.run().await, RunOutcome::NothingToRun);
}

#[test]
fn test_first_run_scenarios() {
    let monday_nine = Arc::new(SimulatedClock::new(utc(2024, 1, 15, 9, 0)));
    let mut calendar = JobCalendar::new().with_clock(monday_nine);
    let daily = calendar
        .schedule("daily", "inline", action_fn(|| Ok(())), "daily", Some("0800"))
        .unwrap();
    assert_eq!(daily.next_run_at(), utc(2024, 1, 16, 8, 0));

    let wednesday = Arc::new(SimulatedClock::new(utc(2024, 1, 17, 11, 0)));
    let mut calendar = JobCalendar::new().with_clock(wednesday);
    let monday = calendar
        .schedule("monday", "inline", action_fn(|| Ok(())), "monday", Some("0000"))
        .unwrap();
    assert_eq!(monday.next_run_at(), utc(2024, 1, 22, 0, 0));

    let saturday = Arc::new(SimulatedClock::new(utc(2024, 1, 20, 12, 0)));
    let mut calendar = JobCalendar::new().with_clock(saturday);
    let weekday = calendar
        .schedule("weekday", "inline", action_fn(|| Ok(())), "weekday", Some("0800"))
        .unwrap();
    assert_eq!(weekday.next_run_at(), utc(2024, 1, 22, 8, 0));
}

#[tokio::test]
async fn test_timezone_shifts_wall_clock_runs() {
    // 06:00 UTC is 07:00 in Berlin (winter).
    let clock = Arc::new(SimulatedClock::new(utc(2024, 1, 15, 6, 0)));
    let mut calendar = JobCalendar::new()
        .with_clock(clock)
        .with_timezone(chrono_tz::Europe::Berlin);

    let job = calendar
        .schedule("report", "inline", action_fn(|| Ok(())), "daily", Some("0800"))
        .unwrap();

    assert_eq!(job.next_run_at(), utc(2024, 1, 15, 7, 0));
}
