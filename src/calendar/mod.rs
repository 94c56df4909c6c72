//! The job calendar.
//!
//! This module provides the loop that sleeps until the earliest job is due,
//! runs due jobs one at a time and stops cleanly on request.

mod clock;
mod engine;
mod handle;
mod types;

pub use clock::{Clock, SystemClock};
pub use engine::JobCalendar;
pub use handle::StopHandle;
pub use types::{CalendarError, RunOutcome};
