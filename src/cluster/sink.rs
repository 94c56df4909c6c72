//! Forwarding of worker output.

use std::fmt;
use std::sync::Mutex;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Destination for lines written by cluster members.
///
/// Called concurrently from every member's monitor task. Implementations must
/// write each line whole.
pub trait OutputSink: Send + Sync {
    fn write_line(&self, port: u16, stream: OutputStream, line: &str);
}

/// Writes member output to the `tracing` log, one event per line.
#[derive(Debug, Default)]
pub struct TracingSink {
    lock: Mutex<()>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for TracingSink {
    fn write_line(&self, port: u16, stream: OutputStream, line: &str) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match stream {
            OutputStream::Stdout => {
                tracing::info!(target: "jobvisor::worker", port, "{}", line)
            }
            OutputStream::Stderr => {
                tracing::warn!(target: "jobvisor::worker", port, stream = %stream, "{}", line)
            }
        }
    }
}
