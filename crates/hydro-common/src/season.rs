//! Month-day values and seasonal windows that may wrap the year end.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DataModelError, DataModelResult};

/// Leap year used whenever a month-day must be placed on a calendar.
const REFERENCE_LEAP_YEAR: i32 = 2020;

/// A day of the year without a year. 29 February is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawMonthDay")]
pub struct MonthDay {
    month: u32,
    day: u32,
}

#[derive(Deserialize)]
struct RawMonthDay {
    month: u32,
    day: u32,
}

impl TryFrom<RawMonthDay> for MonthDay {
    type Error = DataModelError;

    fn try_from(raw: RawMonthDay) -> Result<Self, Self::Error> {
        MonthDay::new(raw.month, raw.day)
    }
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> DataModelResult<Self> {
        if NaiveDate::from_ymd_opt(REFERENCE_LEAP_YEAR, month, day).is_none() {
            return Err(DataModelError::InvalidMonthDay { month, day });
        }
        Ok(Self { month, day })
    }

    /// The month-day of an instant, in UTC.
    pub fn of(time: DateTime<Utc>) -> Self {
        Self {
            month: time.month(),
            day: time.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// One-based day of the year within a leap year.
    pub fn ordinal(&self) -> u32 {
        // Validated on construction
        NaiveDate::from_ymd_opt(REFERENCE_LEAP_YEAR, self.month, self.day)
            .map(|d| d.ordinal())
            .unwrap_or(1)
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--{:02}-{:02}", self.month, self.day)
    }
}

/// An inclusive window of month-days. When `start` is after `end` the window
/// wraps the year end, e.g. 1 December to 1 February.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Season {
    pub start: MonthDay,
    pub end: MonthDay,
}

impl Season {
    pub fn new(start: MonthDay, end: MonthDay) -> Self {
        Self { start, end }
    }

    pub fn wraps_year_end(&self) -> bool {
        self.start > self.end
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, day: MonthDay) -> bool {
        if self.wraps_year_end() {
            day <= self.end || day >= self.start
        } else {
            self.start <= day && day <= self.end
        }
    }

    pub fn contains_time(&self, time: DateTime<Utc>) -> bool {
        self.contains(MonthDay::of(time))
    }

    /// Number of whole days covered, counting both ends, in a leap year.
    pub fn inclusive_days(&self) -> i64 {
        let start = i64::from(self.start.ordinal());
        let end = i64::from(self.end.ordinal());
        let days = end - start + 1;
        if self.wraps_year_end() {
            days + 366
        } else {
            days
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}
