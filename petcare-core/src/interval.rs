//! Repetition intervals: `(amount, unit)` pairs such as "every 2 days".
//!
//! Hours, days and weeks are fixed durations. Months are calendar months and
//! never collapse into a fixed span, except through [`Interval::approximate_duration`]
//! which only exists for provisional estimates.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_WEEK: i64 = 7 * SECS_PER_DAY;

/// Days used for a month when an estimate is unavoidable.
pub const APPROX_DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Hour,
    Day,
    Week,
    Month,
}

impl IntervalUnit {
    /// Case-insensitive match against the fixed synonym table.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "h" | "hr" | "hour" | "hours" => Ok(Self::Hour),
            "d" | "day" | "days" => Ok(Self::Day),
            "w" | "wk" | "week" | "weeks" => Ok(Self::Week),
            "mo" | "month" | "months" => Ok(Self::Month),
            other => Err(ScheduleError::InvalidInterval(format!(
                "unknown unit '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Seconds in one unit, or `None` for calendar months.
    pub fn fixed_seconds(&self) -> Option<i64> {
        match self {
            Self::Hour => Some(SECS_PER_HOUR),
            Self::Day => Some(SECS_PER_DAY),
            Self::Week => Some(SECS_PER_WEEK),
            Self::Month => None,
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated repetition interval. `amount` is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    amount: u32,
    unit: IntervalUnit,
}

#[derive(Deserialize)]
struct RawInterval {
    amount: i64,
    unit: IntervalUnit,
}

impl TryFrom<RawInterval> for Interval {
    type Error = ScheduleError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        let amount = u32::try_from(raw.amount).map_err(|_| {
            ScheduleError::InvalidInterval(format!("amount {} out of range", raw.amount))
        })?;
        Self::new(amount, raw.unit)
    }
}

impl Interval {
    pub fn new(amount: u32, unit: IntervalUnit) -> Result<Self> {
        if amount == 0 {
            return Err(ScheduleError::InvalidInterval(
                "amount must be positive".to_string(),
            ));
        }
        Ok(Self { amount, unit })
    }

    pub fn hours(amount: u32) -> Result<Self> {
        Self::new(amount, IntervalUnit::Hour)
    }

    pub fn days(amount: u32) -> Result<Self> {
        Self::new(amount, IntervalUnit::Day)
    }

    pub fn weeks(amount: u32) -> Result<Self> {
        Self::new(amount, IntervalUnit::Week)
    }

    pub fn months(amount: u32) -> Result<Self> {
        Self::new(amount, IntervalUnit::Month)
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// Total seconds for hour/day/week intervals; `None` for months.
    pub fn fixed_seconds(&self) -> Option<i64> {
        self.unit
            .fixed_seconds()
            .map(|secs| secs * i64::from(self.amount))
    }

    pub fn fixed_duration(&self) -> Option<Duration> {
        self.fixed_seconds().and_then(Duration::try_seconds)
    }

    /// Fixed-span estimate that treats a month as 30 days.
    ///
    /// Only for provisional values that a server-confirmed timestamp will
    /// overwrite; schedule arithmetic goes through [`Interval::advance`].
    pub fn approximate_duration(&self) -> Duration {
        let secs = self
            .fixed_seconds()
            .unwrap_or(i64::from(self.amount) * APPROX_DAYS_PER_MONTH * SECS_PER_DAY);
        Duration::seconds(secs)
    }

    /// `from` moved forward by `steps` whole intervals.
    ///
    /// Month intervals add calendar months, clamping to the last day of
    /// shorter months. Returns `None` if the result leaves chrono's range.
    pub fn advance(&self, from: DateTime<Utc>, steps: u32) -> Option<DateTime<Utc>> {
        match self.fixed_seconds() {
            Some(secs) => {
                let total = secs.checked_mul(i64::from(steps))?;
                from.checked_add_signed(Duration::try_seconds(total)?)
            }
            None => {
                let months = self.amount.checked_mul(steps)?;
                from.checked_add_months(Months::new(months))
            }
        }
    }
}

/// Validate a raw `(amount, unit)` pair, e.g. straight from a form or a sheet row.
///
/// The amount must be a positive integer once trimmed; the unit must be in
/// the synonym table. Unknown units are rejected rather than defaulted.
pub fn parse_interval(amount_raw: impl fmt::Display, unit_raw: &str) -> Result<Interval> {
    let text = amount_raw.to_string();
    let trimmed = text.trim();
    let amount: i64 = trimmed.parse().map_err(|_| {
        ScheduleError::InvalidInterval(format!("amount '{trimmed}' is not an integer"))
    })?;
    if amount <= 0 {
        return Err(ScheduleError::InvalidInterval(format!(
            "amount must be positive, got {amount}"
        )));
    }
    let amount = u32::try_from(amount)
        .map_err(|_| ScheduleError::InvalidInterval(format!("amount {amount} out of range")))?;
    let unit = IntervalUnit::parse(unit_raw)?;
    Interval::new(amount, unit)
}

static INTERVAL_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:every\s+)?(?:([+-]?[0-9]+(?:\.[0-9]+)?)\s*)?([a-z]+)\s*$")
        .unwrap_or_else(|e| panic!("interval pattern must compile: {e}"))
});

impl FromStr for Interval {
    type Err = ScheduleError;

    /// Accepts "2 days", "2d", "every 3 weeks", "every month".
    fn from_str(s: &str) -> Result<Self> {
        let caps = INTERVAL_TEXT.captures(s).ok_or_else(|| {
            ScheduleError::InvalidInterval(format!("cannot read interval from '{s}'"))
        })?;
        let amount = caps.get(1).map_or("1", |m| m.as_str());
        parse_interval(amount, &caps[2])
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amount == 1 {
            write!(f, "every {}", self.unit)
        } else {
            write!(f, "every {} {}s", self.amount, self.unit)
        }
    }
}
