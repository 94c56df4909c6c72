//! Cluster supervisor integration tests.
//!
//! These launch real `sh` workers, so each test uses its own port range.

use crate::common::{process_exists, signal_member, sh_worker, wait_for_members};
use jobvisor::testing::{RecordingHandler, RecordingSink};
use jobvisor::{Cluster, ClusterConfig, ClusterOutcome, Event, EventBus, ShutdownReason};
use nix::sys::signal::Signal;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

async fn recording_bus() -> (EventBus, std::sync::Arc<RecordingHandler>) {
    let handler = RecordingHandler::new();
    let bus = EventBus::new();
    bus.register(handler.clone()).await;
    (bus, handler)
}

#[tokio::test]
async fn test_member_dying_after_survival_is_respawned_on_same_port() {
    let (bus, handler) = recording_bus().await;
    let config = ClusterConfig::new(sh_worker("exec sleep 30"))
        .with_base_port(17000)
        .with_pool_size(3)
        .with_minimum_survival(Duration::from_millis(200));
    let cluster = Cluster::new(config).unwrap().with_event_bus(bus);
    let handle = cluster.handle();

    let run = tokio::spawn(async move { cluster.start().await });

    let before = wait_for_members(&handle, 3, WAIT).await;
    assert_eq!(
        before.iter().map(|m| m.port).collect::<Vec<_>>(),
        vec![17001, 17002, 17003]
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    let victim = before[1].clone();
    signal_member(&victim, Signal::SIGKILL);

    let respawned = handler
        .wait_for(WAIT, |events| {
            events.iter().any(|e| {
                matches!(e, Event::MemberSpawned { port: 17002, replacement: true, .. })
            })
        })
        .await;
    assert!(respawned, "member on 17002 was never replaced");

    let after = wait_for_members(&handle, 3, WAIT).await;
    assert_eq!(
        after.iter().map(|m| m.port).collect::<Vec<_>>(),
        vec![17001, 17002, 17003]
    );
    let replacement = after.iter().find(|m| m.port == 17002).unwrap();
    assert_ne!(replacement.pid, victim.pid);
    assert!(replacement.generation > victim.generation);
    assert!(!handle.is_shutting_down());

    handle.stop();
    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(outcome, ClusterOutcome::Stopped);

    let mut exits = handler.member_exits().await;
    exits.sort_unstable();
    assert_eq!(exits, vec![17001, 17002, 17002, 17003]);
}

#[tokio::test]
async fn test_member_dying_too_soon_takes_down_the_pool() {
    let (bus, handler) = recording_bus().await;
    let config = ClusterConfig::new(sh_worker("exec sleep 30"))
        .with_base_port(17100)
        .with_pool_size(3)
        .with_minimum_survival(Duration::from_secs(3600));
    let cluster = Cluster::new(config).unwrap().with_event_bus(bus);
    let handle = cluster.handle();

    let run = tokio::spawn(async move { cluster.start().await });

    let members = wait_for_members(&handle, 3, WAIT).await;
    signal_member(&members[0], Signal::SIGKILL);

    let outcome = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert!(matches!(outcome, ClusterOutcome::FatalCrash { port: 17101, .. }));

    assert!(handle.is_shutting_down());
    assert!(handle.members().await.is_empty());

    // No replacement was attempted.
    assert_eq!(
        handler.member_spawns().await,
        vec![(17101, false), (17102, false), (17103, false)]
    );
    let mut exits = handler.member_exits().await;
    exits.sort_unstable();
    assert_eq!(exits, vec![17101, 17102, 17103]);

    for member in &members[1..] {
        let pid = member.pid.unwrap();
        assert!(!process_exists(pid), "survivor {} still running", pid);
    }

    let events = handler.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ClusterShutdown { reason: ShutdownReason::FatalCrash { port: 17101, .. }, .. }
    )));
}

#[tokio::test]
async fn test_stop_kills_members_that_ignore_sigterm() {
    let config = ClusterConfig::new(sh_worker("trap '' TERM; while :; do sleep 1; done"))
        .with_base_port(17200)
        .with_pool_size(2)
        .with_shutdown_timeout(Duration::from_millis(300));
    let cluster = Cluster::new(config).unwrap();
    let handle = cluster.handle();

    let run = tokio::spawn(async move { cluster.start().await });
    let members = wait_for_members(&handle, 2, WAIT).await;

    // Give the shells time to install their traps.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    handle.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown should be bounded")
        .unwrap()
        .unwrap();

    assert_eq!(outcome, ClusterOutcome::Stopped);
    assert!(start.elapsed() < Duration::from_secs(5));
    for member in members {
        assert!(!process_exists(member.pid.unwrap()));
    }
}

#[tokio::test]
async fn test_stop_kills_members_that_closed_their_output() {
    let config = ClusterConfig::new(sh_worker(
        "exec >/dev/null 2>&1; trap '' TERM; while :; do sleep 1; done",
    ))
    .with_base_port(17400)
    .with_pool_size(1)
    .with_shutdown_timeout(Duration::from_millis(300));
    let cluster = Cluster::new(config).unwrap();
    let handle = cluster.handle();

    let run = tokio::spawn(async move { cluster.start().await });
    let members = wait_for_members(&handle, 1, WAIT).await;
    let pid = members[0].pid.unwrap();

    // Let the shell detach its output and install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(process_exists(pid));

    handle.stop();
    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown should be bounded")
        .unwrap()
        .unwrap();

    assert_eq!(outcome, ClusterOutcome::Stopped);
    assert!(!process_exists(pid), "member {} outlived the cluster", pid);
}

#[tokio::test]
async fn test_workers_receive_their_port_and_output_is_tagged() {
    let sink = RecordingSink::new();
    let config = ClusterConfig::new(sh_worker("echo \"up $1 $2\"; echo oops >&2; exec sleep 30"))
        .with_base_port(17300)
        .with_pool_size(2);
    let cluster = Cluster::new(config).unwrap().with_sink(sink.clone());
    let handle = cluster.handle();

    let run = tokio::spawn(async move { cluster.start().await });
    wait_for_members(&handle, 2, WAIT).await;

    let deadline = Instant::now() + WAIT;
    while sink.lines().len() < 4 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop();
    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();

    let lines = sink.lines();
    for port in [17301_u16, 17302] {
        assert!(lines.iter().any(|(p, stream, line)| {
            *p == port && *stream == jobvisor::OutputStream::Stdout && *line == format!("up --port {}", port)
        }));
        assert!(lines.iter().any(|(p, stream, line)| {
            *p == port && *stream == jobvisor::OutputStream::Stderr && line == "oops"
        }));
    }
}
