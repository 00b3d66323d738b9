//! Recurring cadences and their compact notation.
//!
//! The notation is `@<unit>(<count>), <start>, <end>`, for example
//! `@hour(1), now, 2025-12-31`. `<start>` and `<end>` are dates or `now`;
//! `<end>` may also be `never` for an open-ended cadence.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trigger_engine::{CalendarUnit, Schedule, TriggerKey};

/// Unit of a [`ScheduleEntry`] interval.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Units of a day and above are not fixed-duration in wall-clock time.
    pub fn is_calendar(self) -> bool {
        matches!(self, Self::Day | Self::Week | Self::Month | Self::Year)
    }

    fn seconds(self) -> Option<u64> {
        match self {
            Self::Second => Some(1),
            Self::Minute => Some(60),
            Self::Hour => Some(3600),
            _ => None,
        }
    }

    /// Engine schedule firing every `count` units.
    pub fn to_schedule(self, count: u32) -> Schedule {
        match self {
            Self::Day => Schedule::calendar(count, CalendarUnit::Day),
            Self::Week => Schedule::calendar(count, CalendarUnit::Week),
            Self::Month => Schedule::calendar(count, CalendarUnit::Month),
            Self::Year => Schedule::calendar(count, CalendarUnit::Year),
            fixed => {
                let secs = fixed.seconds().unwrap_or(1);
                Schedule::simple(Duration::from_secs(secs * u64::from(count)))
            }
        }
    }

    /// Best-effort inverse of [`IntervalUnit::to_schedule`] for triggers that
    /// do not carry their unit.
    ///
    /// Fixed intervals are expressed in the largest unit that divides them
    /// exactly, so `@minute(60)` reads back as `@hour(1)`.
    pub fn from_schedule(schedule: Schedule) -> Option<(u32, Self)> {
        match schedule {
            Schedule::Calendar { count, unit } => {
                let unit = match unit {
                    CalendarUnit::Day => Self::Day,
                    CalendarUnit::Week => Self::Week,
                    CalendarUnit::Month => Self::Month,
                    CalendarUnit::Year => Self::Year,
                };
                Some((count, unit))
            }
            Schedule::Simple { interval } => {
                let secs = interval.as_secs();
                [Self::Hour, Self::Minute, Self::Second]
                    .into_iter()
                    .find_map(|unit| {
                        let size = unit.seconds()?;
                        if secs > 0 && secs % size == 0 {
                            u32::try_from(secs / size).ok().map(|count| (count, unit))
                        } else {
                            None
                        }
                    })
            }
        }
    }
}

/// Errors from parsing or validating a [`ScheduleEntry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("expected 3 comma-separated fields, found {0}")]
    FieldCount(usize),

    #[error("interval must start with '@', found '{0}'")]
    MissingPrefix(String),

    #[error("unknown interval unit '{0}'")]
    UnknownUnit(String),

    #[error("interval '{0}' is missing parentheses around the count")]
    MissingParentheses(String),

    #[error("interval count '{0}' is not a positive integer")]
    InvalidInterval(String),

    #[error("invalid {field} date '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("interval count must be greater than zero")]
    ZeroInterval,

    #[error("end {end} is before start {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// One recurring cadence attachable to a process job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub start: DateTime<Utc>,
    /// `None` means open-ended.
    pub end: Option<DateTime<Utc>>,
    pub interval: u32,
    pub unit: IntervalUnit,
    /// Set when the entry refers to an already registered trigger.
    pub id: Option<TriggerKey>,
}

impl ScheduleEntry {
    pub fn new(
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        interval: u32,
        unit: IntervalUnit,
    ) -> Self {
        Self {
            start,
            end,
            interval,
            unit,
            id: None,
        }
    }

    pub fn with_id(mut self, id: TriggerKey) -> Self {
        self.id = Some(id);
        self
    }

    pub fn validate(&self) -> Result<(), ScheduleParseError> {
        if self.interval == 0 {
            return Err(ScheduleParseError::ZeroInterval);
        }
        if let Some(end) = self.end
            && end < self.start
        {
            return Err(ScheduleParseError::EndBeforeStart {
                start: self.start,
                end,
            });
        }
        Ok(())
    }

    /// Parse the compact notation, resolving `now` against `now`.
    pub fn parse_at(notation: &str, now: DateTime<Utc>) -> Result<Self, ScheduleParseError> {
        let fields: Vec<&str> = notation.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(ScheduleParseError::FieldCount(fields.len()));
        }

        let (interval, unit) = parse_interval(fields[0])?;
        let start = parse_date(fields[1], "start", now)?;
        let end = if fields[2].eq_ignore_ascii_case("never") {
            None
        } else {
            Some(parse_date(fields[2], "end", now)?)
        };

        let entry = Self::new(start, end, interval, unit);
        entry.validate()?;
        Ok(entry)
    }
}

impl FromStr for ScheduleEntry {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_at(s, Utc::now())
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = match self.end {
            Some(end) => end.to_rfc3339_opts(SecondsFormat::Secs, true),
            None => "never".to_string(),
        };
        write!(f, "@{}({}), {}, {}", self.unit, self.interval, start, end)
    }
}

fn parse_interval(field: &str) -> Result<(u32, IntervalUnit), ScheduleParseError> {
    let body = field
        .strip_prefix('@')
        .ok_or_else(|| ScheduleParseError::MissingPrefix(field.to_string()))?;

    let (unit, rest) = body
        .split_once('(')
        .ok_or_else(|| ScheduleParseError::MissingParentheses(field.to_string()))?;
    let count = rest
        .strip_suffix(')')
        .ok_or_else(|| ScheduleParseError::MissingParentheses(field.to_string()))?;

    let unit = IntervalUnit::from_str(unit.trim())
        .map_err(|_| ScheduleParseError::UnknownUnit(unit.trim().to_string()))?;
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|_| ScheduleParseError::InvalidInterval(count.trim().to_string()))?;

    Ok((count, unit))
}

const DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

fn parse_date(
    value: &str,
    field: &'static str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleParseError> {
    if value.eq_ignore_ascii_case("now") {
        return Ok(now);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        && let Some(dt) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(dt.and_utc());
    }
    Err(ScheduleParseError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
