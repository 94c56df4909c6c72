//! Stop handle for the job calendar.

use tokio_util::sync::CancellationToken;

/// Handle for asking a running calendar to stop.
///
/// Cloneable and safe to use from signal handlers and other tasks. Stopping
/// wakes the calendar out of its sleep immediately. A job that is already
/// running is allowed to finish.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Request a stop. Calling this more than once has no further effect.
    pub fn request_stop(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Calendar stop requested");
        }
        self.token.cancel();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}
