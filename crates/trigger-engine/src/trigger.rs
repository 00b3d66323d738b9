//! Triggers and their fire-time arithmetic.

use std::time::Duration;

use chrono::offset::LocalResult;
use chrono::{DateTime, Days, Months, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{EngineError, Result};
use crate::job::JobDataMap;
use crate::key::{JobKey, TriggerKey};

/// Step used to walk out of a daylight-saving gap.
const GAP_STEP_MINUTES: i64 = 15;

/// Longest daylight-saving gap we expect to walk over (in steps).
const MAX_GAP_STEPS: usize = 4 * 24;

/// Unit of a calendar-interval schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarUnit {
    Day,
    Week,
    Month,
    Year,
}

impl CalendarUnit {
    /// Longest possible length of one unit in seconds (25h days).
    fn max_seconds(self) -> i64 {
        const DAY: i64 = 25 * 3600;
        match self {
            Self::Day => DAY,
            Self::Week => 7 * DAY,
            Self::Month => 31 * DAY,
            Self::Year => 366 * DAY,
        }
    }

    fn add(self, base: NaiveDateTime, amount: u32) -> Option<NaiveDateTime> {
        match self {
            Self::Day => base.checked_add_days(Days::new(u64::from(amount))),
            Self::Week => base.checked_add_days(Days::new(u64::from(amount) * 7)),
            Self::Month => base.checked_add_months(Months::new(amount)),
            Self::Year => base.checked_add_months(Months::new(amount.checked_mul(12)?)),
        }
    }
}

/// How a trigger repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed elapsed-time interval.
    Simple { interval: Duration },
    /// Every `count` calendar units, in the engine's local time.
    Calendar { count: u32, unit: CalendarUnit },
}

impl Schedule {
    pub fn simple(interval: Duration) -> Self {
        Self::Simple { interval }
    }

    pub fn calendar(count: u32, unit: CalendarUnit) -> Self {
        Self::Calendar { count, unit }
    }
}

/// Lifecycle state of a stored trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Normal,
    Paused,
    Complete,
}

/// A schedule bound to a job.
#[derive(Debug, Clone)]
pub struct Trigger {
    key: TriggerKey,
    job_key: JobKey,
    schedule: Schedule,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    description: Option<String>,
    data: JobDataMap,
    next_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    times_triggered: u64,
    state: TriggerState,
}

impl Trigger {
    pub fn new(
        key: TriggerKey,
        job_key: JobKey,
        schedule: Schedule,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key,
            job_key,
            schedule,
            start_time,
            end_time,
            description: None,
            data: JobDataMap::new(),
            next_fire_time: None,
            previous_fire_time: None,
            times_triggered: 0,
            state: TriggerState::Normal,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a free-form property, readable back through [`Trigger::data`].
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn times_triggered(&self) -> u64 {
        self.times_triggered
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.schedule {
            Schedule::Simple { interval } if interval.is_zero() => {
                return Err(EngineError::InvalidSchedule(
                    "repeat interval must be positive".to_string(),
                ));
            }
            Schedule::Calendar { count: 0, .. } => {
                return Err(EngineError::InvalidSchedule(
                    "calendar interval must be positive".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(end) = self.end_time
            && end < self.start_time
        {
            return Err(EngineError::InvalidSchedule(format!(
                "end time {end} is before start time {}",
                self.start_time
            )));
        }

        Ok(())
    }

    /// First fire time strictly after `after`, or `None` past the end time.
    pub fn fire_time_after(&self, after: DateTime<Utc>, tz: &Tz) -> Option<DateTime<Utc>> {
        let candidate = if after < self.start_time {
            Some(self.start_time)
        } else {
            match self.schedule {
                Schedule::Simple { interval } => {
                    let step = i64::try_from(interval.as_millis()).ok()?.max(1);
                    let elapsed = (after - self.start_time).num_milliseconds();
                    let n = elapsed / step + 1;
                    let offset = TimeDelta::try_milliseconds(n.checked_mul(step)?)?;
                    self.start_time.checked_add_signed(offset)
                }
                Schedule::Calendar { count, unit } => {
                    let elapsed = (after - self.start_time).num_seconds();
                    let span = unit.max_seconds() * i64::from(count);
                    let mut n = u32::try_from((elapsed / span).max(0)).ok()?;
                    loop {
                        let occurrence = self.calendar_occurrence(n, count, unit, tz)?;
                        if occurrence > after {
                            break Some(occurrence);
                        }
                        n = n.checked_add(1)?;
                    }
                }
            }
        };

        candidate.filter(|t| self.end_time.is_none_or(|end| *t <= end))
    }

    fn calendar_occurrence(
        &self,
        n: u32,
        count: u32,
        unit: CalendarUnit,
        tz: &Tz,
    ) -> Option<DateTime<Utc>> {
        let local_start = self.start_time.with_timezone(tz).naive_local();
        let local = unit.add(local_start, n.checked_mul(count)?)?;
        resolve_local(tz, local)
    }

    /// Set the first fire time when the trigger is stored.
    ///
    /// A start time within `misfire_threshold` of `now` fires right away;
    /// an older start resumes at the next occurrence after `now`.
    pub(crate) fn compute_first_fire_time(
        &mut self,
        now: DateTime<Utc>,
        tz: &Tz,
        misfire_threshold: TimeDelta,
    ) -> Option<DateTime<Utc>> {
        let first = if self.start_time + misfire_threshold >= now {
            Some(self.start_time)
        } else {
            self.fire_time_after(now, tz)
        };
        self.next_fire_time = first;
        first
    }

    /// Advance past the current fire time. Missed occurrences are skipped.
    pub(crate) fn triggered(&mut self, now: DateTime<Utc>, tz: &Tz) {
        self.times_triggered += 1;
        self.previous_fire_time = self.next_fire_time;
        let base = self.next_fire_time.map_or(now, |t| t.max(now));
        self.next_fire_time = self.fire_time_after(base, tz);
        if self.next_fire_time.is_none() {
            self.state = TriggerState::Complete;
        }
    }

    pub(crate) fn pause(&mut self) {
        if self.state == TriggerState::Normal {
            self.state = TriggerState::Paused;
        }
    }

    pub(crate) fn resume(&mut self, now: DateTime<Utc>, tz: &Tz, misfire_threshold: TimeDelta) {
        if self.state != TriggerState::Paused {
            return;
        }
        self.state = TriggerState::Normal;
        if let Some(next) = self.next_fire_time
            && next + misfire_threshold < now
        {
            self.next_fire_time = self.fire_time_after(now, tz);
        }
        if self.next_fire_time.is_none() {
            self.state = TriggerState::Complete;
        }
    }
}

/// Map a local wall-clock time to UTC.
///
/// Ambiguous times take the earliest instant; times inside a gap move
/// forward to the first valid local time.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let mut probe = local;
    for _ in 0..MAX_GAP_STEPS {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
            LocalResult::None => {
                probe = probe.checked_add_signed(TimeDelta::minutes(GAP_STEP_MINUTES))?;
            }
        }
    }
    None
}
