//! Date selections made by the user and the validated hourly window derived from them.

use crate::error::WxSenseError;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// What the user picked: one day, or a start and end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelection {
    /// A single day. The hourly window runs from midnight of that day to
    /// midnight of the following day.
    SingleDay(NaiveDate),
    /// An explicit date range. The hourly window runs from midnight of
    /// `start` to midnight of `end`.
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateSelection {
    /// Resolves the selection into a validated [`QueryRange`].
    ///
    /// # Errors
    ///
    /// Returns [`WxSenseError::InvalidDateRange`] for a range whose start lies after its end.
    pub fn query_range(self) -> Result<QueryRange, WxSenseError> {
        match self {
            DateSelection::SingleDay(day) => Ok(QueryRange::single_day(day)),
            DateSelection::Range { start, end } => QueryRange::new(start, end),
        }
    }
}

/// A validated, inclusive hourly window `[start 00:00, end 00:00]`.
///
/// Both bounds are midnight timestamps, so a range from 2024-10-31 to
/// 2024-11-03 covers 73 hourly records when the source is complete.
/// A range with `start == end` is valid and covers a single hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl QueryRange {
    /// Creates a range from two dates.
    ///
    /// # Errors
    ///
    /// Returns [`WxSenseError::InvalidDateRange`] if `start` is after `end`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use wxsense::QueryRange;
    ///
    /// let start = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
    /// let end = NaiveDate::from_ymd_opt(2024, 10, 31).unwrap();
    /// assert!(QueryRange::new(start, end).is_err());
    /// ```
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WxSenseError> {
        if start > end {
            return Err(WxSenseError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The window for a single day: `day 00:00` to `day + 1 00:00`.
    pub fn single_day(day: NaiveDate) -> Self {
        let end = day.checked_add_days(Days::new(1)).unwrap_or(day);
        Self { start: day, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First hour of the window (inclusive).
    pub fn start_datetime(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// Last hour of the window (inclusive).
    pub fn end_datetime(&self) -> NaiveDateTime {
        self.end.and_time(NaiveTime::MIN)
    }

    /// Number of calendar days touched by the window, counting both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, datetime: NaiveDateTime) -> bool {
        datetime >= self.start_datetime() && datetime <= self.end_datetime()
    }
}

impl fmt::Display for QueryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}
