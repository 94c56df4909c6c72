//! Common test utilities shared across integration tests.

use jobvisor::{ClusterHandle, MemberSnapshot, WorkerCommand};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;

/// A worker that runs `script` under `sh`; `$2` is the port.
pub fn sh_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").with_args(["-c", script, "worker"])
}

/// Wait until the cluster has `count` live members, polling.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_members(
    handle: &ClusterHandle,
    count: usize,
    timeout: Duration,
) -> Vec<MemberSnapshot> {
    let start = tokio::time::Instant::now();
    loop {
        let members = handle.members().await;
        if members.len() == count {
            return members;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} members, have {:?}",
                count, members
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Send `signal` to a member process.
pub fn signal_member(member: &MemberSnapshot, signal: Signal) {
    let pid = member.pid.expect("member has a pid");
    signal::kill(Pid::from_raw(pid as i32), signal).expect("signal delivered");
}

/// Whether a process with this pid still exists.
pub fn process_exists(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
