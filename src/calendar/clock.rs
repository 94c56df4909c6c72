//! Time source for the calendar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of wall clock time and sleeping.
///
/// The calendar never reads the system clock directly, so tests can drive it
/// with simulated time (see [`crate::testing::SimulatedClock`]).
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
