//! Calendar-month billing periods.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Earliest year accepted for a billing period.
const MIN_YEAR: i32 = 1970;

/// Latest year accepted for a billing period.
const MAX_YEAR: i32 = 9999;

/// A calendar month in UTC, written `YYYY-MM`.
///
/// A period covers the half-open interval `[start, end)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingPeriod {
    first_day: NaiveDate,
}

impl BillingPeriod {
    /// Build a period from a year and a 1-based month.
    ///
    /// # Errors
    ///
    /// Returns `PeriodError::OutOfRange` for months outside 1..=12 or years
    /// outside 1970..=9999.
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(PeriodError::OutOfRange);
        }
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or(PeriodError::OutOfRange)?;
        Ok(Self { first_day })
    }

    /// The period containing the given instant.
    ///
    /// # Errors
    ///
    /// Returns `PeriodError::OutOfRange` if the instant's year is unsupported.
    pub fn containing(instant: DateTime<Utc>) -> Result<Self, PeriodError> {
        Self::new(instant.year(), instant.month())
    }

    /// Calendar year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    /// Calendar month (1-based).
    #[must_use]
    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    /// First UTC day of the period.
    #[must_use]
    pub const fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    /// First UTC day of the following period.
    #[must_use]
    pub fn next_first_day(&self) -> NaiveDate {
        self.first_day + Months::new(1)
    }

    /// Inclusive start instant.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        start_of_day(self.first_day)
    }

    /// Exclusive end instant.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        start_of_day(self.next_first_day())
    }

    /// Whether the instant falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start() && instant < self.end()
    }

    /// Number of UTC days in the period.
    #[must_use]
    pub fn days(&self) -> u32 {
        // 28..=31, always fits
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let days = (self.next_first_day() - self.first_day).num_days() as u32;
        days
    }

    /// Every UTC day of the period, in order.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.next_first_day();
        self.first_day.iter_days().take_while(move |day| *day < end)
    }
}

/// Midnight UTC at the start of the given day.
#[must_use]
pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
}

impl FromStr for BillingPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s.split_once('-').ok_or(PeriodError::InvalidFormat)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(PeriodError::InvalidFormat);
        }
        let year: i32 = year.parse().map_err(|_| PeriodError::InvalidFormat)?;
        let month: u32 = month.parse().map_err(|_| PeriodError::InvalidFormat)?;
        Self::new(year, month)
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl fmt::Debug for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BillingPeriod({self})")
    }
}

impl TryFrom<String> for BillingPeriod {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingPeriod> for String {
    fn from(period: BillingPeriod) -> Self {
        period.to_string()
    }
}

/// Errors produced when parsing or building a billing period.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    /// Not of the form `YYYY-MM`.
    #[error("period must be formatted as YYYY-MM")]
    InvalidFormat,

    /// Month or year out of the supported range.
    #[error("period is out of range")]
    OutOfRange,
}
