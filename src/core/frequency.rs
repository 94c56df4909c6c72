//! Recurrence rules and next run calculation.
//!
//! A job recurs on one of a fixed set of [`Frequency`] rules, optionally at a
//! [`TimeOfDay`]. All calendar arithmetic happens in the configured timezone;
//! results are returned in UTC.

use chrono::{
    DateTime, Datelike, Days, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing recurrence rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrequencyError {
    /// The rule is not one of the supported frequencies.
    #[error("unknown frequency: {0}")]
    UnknownFrequency(String),

    /// The time of day could not be parsed.
    #[error("invalid time of day: {0}")]
    InvalidTimeOfDay(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// How often a job recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// Top of every hour. The time of day is ignored.
    Hourly,
    /// Every day.
    Daily,
    /// Monday through Friday.
    Weekday,
    /// Once a week, on Monday.
    Weekly,
    /// Once a month, on the first.
    Monthly,
    /// Once a week on a specific day.
    On(Weekday),
}

impl Frequency {
    /// All rules accepted by [`Frequency::from_str`].
    pub const NAMES: [&'static str; 12] = [
        "hourly", "daily", "weekday", "weekly", "monthly", "sunday", "monday", "tuesday",
        "wednesday", "thursday", "friday", "saturday",
    ];

    /// Compute the next run at or after `now` for this rule.
    ///
    /// Candidates that fall strictly before `now` are pushed forward by one
    /// unit of the rule (day, week, month). A candidate equal to `now` is
    /// returned as is.
    pub fn next_after(&self, now: DateTime<Utc>, at: TimeOfDay, tz: Tz) -> DateTime<Utc> {
        let local = now.with_timezone(&tz).naive_local();
        let today = local.date();

        match self {
            Frequency::Hourly => {
                // Truncate at the offset in force at `now`, so the repeated
                // fall-back hour cannot map the top of the hour into the past.
                let offset = now.with_timezone(&tz).offset().fix();
                let wall = now.with_timezone(&offset);
                let top = wall
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(wall);
                top.with_timezone(&Utc) + chrono::Duration::hours(1)
            }
            Frequency::Daily => {
                let candidate = at.on(today, tz);
                if candidate < now {
                    at.on(add_days(today, 1), tz)
                } else {
                    candidate
                }
            }
            Frequency::Weekday => match today.weekday() {
                Weekday::Sat => at.on(add_days(today, 2), tz),
                Weekday::Sun => at.on(add_days(today, 1), tz),
                weekday => {
                    let candidate = at.on(today, tz);
                    if candidate >= now {
                        candidate
                    } else if weekday == Weekday::Fri {
                        at.on(add_days(today, 3), tz)
                    } else {
                        at.on(add_days(today, 1), tz)
                    }
                }
            },
            Frequency::Weekly => weekly_from(week_start(today), at, now, tz),
            Frequency::On(day) => {
                let offset = u64::from(day.num_days_from_monday());
                weekly_from(add_days(week_start(today), offset), at, now, tz)
            }
            Frequency::Monthly => {
                let first = today.with_day(1).unwrap_or(today);
                let candidate = at.on(first, tz);
                if candidate < now {
                    let next_month = first.checked_add_months(Months::new(1)).unwrap_or(first);
                    at.on(next_month, tz)
                } else {
                    candidate
                }
            }
        }
    }
}

fn weekly_from(day: NaiveDate, at: TimeOfDay, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let candidate = at.on(day, tz);
    if candidate < now {
        at.on(add_days(day, 7), tz)
    } else {
        candidate
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(date)
}

/// Map a local wall clock time to UTC.
///
/// Ambiguous times (DST fall back) take the earlier instant; times inside a
/// DST gap move forward by the gap.
fn resolve(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local))
        }
    }
}

impl FromStr for Frequency {
    type Err = FrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let frequency = match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Frequency::Hourly,
            "daily" => Frequency::Daily,
            "weekday" => Frequency::Weekday,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "sunday" => Frequency::On(Weekday::Sun),
            "monday" => Frequency::On(Weekday::Mon),
            "tuesday" => Frequency::On(Weekday::Tue),
            "wednesday" => Frequency::On(Weekday::Wed),
            "thursday" => Frequency::On(Weekday::Thu),
            "friday" => Frequency::On(Weekday::Fri),
            "saturday" => Frequency::On(Weekday::Sat),
            _ => return Err(FrequencyError::UnknownFrequency(s.to_string())),
        };
        Ok(frequency)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekday => "weekday",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::On(Weekday::Sun) => "sunday",
            Frequency::On(Weekday::Mon) => "monday",
            Frequency::On(Weekday::Tue) => "tuesday",
            Frequency::On(Weekday::Wed) => "wednesday",
            Frequency::On(Weekday::Thu) => "thursday",
            Frequency::On(Weekday::Fri) => "friday",
            Frequency::On(Weekday::Sat) => "saturday",
        };
        f.write_str(name)
    }
}

/// Offset from local midnight at which a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    /// Midnight.
    pub const MIDNIGHT: TimeOfDay = TimeOfDay { hour: 0, minute: 0 };

    /// Create a time of day, validating the range.
    pub fn new(hour: u32, minute: u32) -> Result<Self, FrequencyError> {
        if hour > 23 || minute > 59 {
            return Err(FrequencyError::InvalidTimeOfDay(format!(
                "{:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Hours past midnight.
    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Minutes past the hour.
    pub fn minute(&self) -> u32 {
        self.minute
    }

    fn naive(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    fn on(&self, date: NaiveDate, tz: Tz) -> DateTime<Utc> {
        resolve(date.and_time(self.naive()), tz)
    }
}

impl FromStr for TimeOfDay {
    type Err = FrequencyError;

    /// Accepts `HHMM` (e.g. `0800`) or `HH:MM` (e.g. `8:00`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || FrequencyError::InvalidTimeOfDay(s.to_string());

        let (hours, minutes) = match trimmed.split_once(':') {
            Some((h, m)) => (h, m),
            None if trimmed.len() == 4 => trimmed.split_at(2),
            None => return Err(invalid()),
        };

        if hours.is_empty()
            || minutes.len() != 2
            || !hours.chars().chain(minutes.chars()).all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let hour: u32 = hours.parse().map_err(|_| invalid())?;
        let minute: u32 = minutes.parse().map_err(|_| invalid())?;
        TimeOfDay::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, FrequencyError> {
    name.parse::<Tz>()
        .map_err(|_| FrequencyError::InvalidTimezone(name.to_string()))
}
