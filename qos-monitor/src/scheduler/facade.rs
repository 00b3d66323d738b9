//! Domain facade over the trigger engine.
//!
//! A process job is keyed by (service id as namespace, process id as name)
//! and is durable: it exists without triggers. Each [`ScheduleEntry`]
//! attached to it becomes one independent trigger.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use trigger_engine::{CalendarUnit, JobDetail, JobKey, Schedule, Scheduler, Trigger, TriggerKey};
use uuid::Uuid;

use super::cache::ProcessCache;
use super::{PROBING_JOB_TYPE, PURGE_JOB_TYPE, SYSTEM_NAMESPACE};
use crate::domain::{IntervalUnit, ScheduleEntry};
use crate::{Error, Result};

/// Name of the measurement purge job and its trigger.
const PURGE_JOB_NAME: &str = "measurement-purge";

/// Trigger data keys holding the interval exactly as the entry stated it.
const INTERVAL_DATA_KEY: &str = "interval";
const UNIT_DATA_KEY: &str = "unit";

/// Public scheduling surface of the monitor.
pub struct MonitorScheduler {
    engine: Scheduler,
    cache: Arc<ProcessCache>,
}

impl MonitorScheduler {
    pub fn new(engine: Scheduler, cache: Arc<ProcessCache>) -> Self {
        Self { engine, cache }
    }

    pub fn engine(&self) -> &Scheduler {
        &self.engine
    }

    /// Job handle of a process.
    pub fn job_key(namespace: &str, name: &str) -> JobKey {
        JobKey::new(name, namespace)
    }

    // ========== Jobs ==========

    /// Register (or re-register) a process job. Attached schedules are kept.
    pub fn register_job(&self, namespace: &str, name: &str) -> Result<JobKey> {
        validate_identifier("namespace", namespace)?;
        validate_identifier("job name", name)?;

        let key = Self::job_key(namespace, name);
        let detail = JobDetail::new(key.clone(), PROBING_JOB_TYPE)
            .durable(true)
            .with_description(format!("Probe {name} on {namespace}"));
        self.engine.add_job(detail, true)?;
        debug!(job = %key, "Process job registered");
        Ok(key)
    }

    /// Delete a job with all of its schedules.
    pub fn remove_job(&self, job: &JobKey) -> Result<()> {
        self.cache.invalidate_process(job.group(), job.name());
        if !self.engine.delete_job(job)? {
            return Err(Error::not_found("Job", job.to_string()));
        }
        info!(job = %job, "Process job removed");
        Ok(())
    }

    pub fn pause_job(&self, job: &JobKey) -> Result<()> {
        self.engine.pause_job(job).map_err(Into::into)
    }

    pub fn resume_job(&self, job: &JobKey) -> Result<()> {
        self.engine.resume_job(job).map_err(Into::into)
    }

    pub fn is_paused(&self, job: &JobKey) -> bool {
        self.engine.is_job_paused(job)
    }

    /// Whether a job exists, looked up across every namespace.
    pub fn is_job_registered(&self, job: &JobKey) -> bool {
        self.engine
            .job_group_names()
            .iter()
            .any(|group| self.engine.job_keys(group).contains(job))
    }

    /// Job keys of one namespace.
    pub fn jobs_in(&self, namespace: &str) -> Vec<JobKey> {
        self.engine.job_keys(namespace)
    }

    // ========== Schedules ==========

    /// Attach a schedule to an existing job and return the new trigger's identity.
    pub fn attach_schedule(&self, job: &JobKey, entry: &ScheduleEntry) -> Result<TriggerKey> {
        let key = TriggerKey::new(Uuid::new_v4().to_string(), job.group());
        self.schedule_entry(job, key, entry)
    }

    /// Re-attach a previously persisted entry under its stored identity.
    pub fn restore_schedule(&self, job: &JobKey, entry: &ScheduleEntry) -> Result<TriggerKey> {
        let id = entry
            .id
            .as_ref()
            .ok_or_else(|| Error::validation("schedule entry has no trigger identity"))?;
        self.schedule_entry(job, TriggerKey::new(id.name(), job.group()), entry)
    }

    fn schedule_entry(
        &self,
        job: &JobKey,
        key: TriggerKey,
        entry: &ScheduleEntry,
    ) -> Result<TriggerKey> {
        entry
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;
        if self.engine.get_job_detail(job).is_none() {
            return Err(Error::not_found("Job", job.to_string()));
        }

        let first_fire = self.engine.schedule_trigger(build_trigger(key.clone(), job, entry))?;
        info!(
            job = %job,
            trigger = %key,
            schedule = %entry,
            first_fire = %first_fire,
            "Schedule attached"
        );
        Ok(key)
    }

    /// Replace the cadence of an existing trigger, keeping its identity.
    ///
    /// The old cadence never fires once this returns `Ok`.
    pub fn update_schedule(&self, entry: &ScheduleEntry) -> Result<()> {
        let key = entry
            .id
            .as_ref()
            .ok_or_else(|| Error::validation("schedule entry has no trigger identity"))?;
        entry
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let existing = self
            .engine
            .get_trigger(key)
            .ok_or_else(|| Error::not_found("Schedule", key.to_string()))?;
        let trigger = build_trigger(key.clone(), existing.job_key(), entry);
        self.engine.reschedule_trigger(key, trigger)?;
        info!(trigger = %key, schedule = %entry, "Schedule updated");
        Ok(())
    }

    pub fn remove_schedule(&self, trigger: &TriggerKey) -> Result<()> {
        if !self.engine.unschedule_trigger(trigger)? {
            return Err(Error::not_found("Schedule", trigger.to_string()));
        }
        debug!(trigger = %trigger, "Schedule removed");
        Ok(())
    }

    /// Whether a trigger exists, looked up across every namespace.
    pub fn is_schedule_registered(&self, trigger: &TriggerKey) -> bool {
        self.engine
            .trigger_group_names()
            .iter()
            .any(|group| self.engine.trigger_keys(group).contains(trigger))
    }

    /// Schedule entries currently attached to a job, ordered by trigger identity.
    pub fn list_schedules_of(&self, job: &JobKey) -> Vec<ScheduleEntry> {
        self.engine
            .get_triggers_of_job(job)
            .iter()
            .filter_map(entry_of)
            .collect()
    }

    // ========== Namespaces ==========

    /// Move every job of `old` to `new`, re-creating its schedules.
    ///
    /// Not atomic across the namespace: a failure leaves the jobs handled so
    /// far in `new` and the rest in `old`. Returns the number of jobs moved.
    pub fn rename_namespace(&self, old: &str, new: &str) -> Result<usize> {
        validate_identifier("namespace", old)?;
        validate_identifier("namespace", new)?;
        if old == new {
            return Ok(0);
        }

        self.cache.invalidate(old);
        self.cache.invalidate(new);

        let mut moved = 0;
        for key in self.engine.job_keys(old) {
            let Some(detail) = self.engine.get_job_detail(&key) else {
                continue;
            };
            let entries = self.list_schedules_of(&key);
            let paused = self.engine.is_job_paused(&key);

            let new_key = JobKey::new(key.name(), new);
            self.engine.add_job(detail.with_key(new_key.clone()), true)?;
            if paused {
                self.engine.pause_job(&new_key)?;
            }
            for entry in &entries {
                let fresh = ScheduleEntry {
                    id: None,
                    ..entry.clone()
                };
                self.attach_schedule(&new_key, &fresh)?;
            }
            self.engine.delete_job(&key)?;

            debug!(from = %key, to = %new_key, schedules = entries.len(), "Job moved");
            moved += 1;
        }

        info!(from = old, to = new, jobs = moved, "Namespace renamed");
        Ok(moved)
    }

    // ========== System jobs ==========

    /// Register the daily measurement purge job unless it already exists.
    pub fn schedule_purge(&self) -> Result<Option<TriggerKey>> {
        let job = JobKey::new(PURGE_JOB_NAME, SYSTEM_NAMESPACE);
        if self.engine.get_job_detail(&job).is_some() {
            return Ok(None);
        }
        self.engine.add_job(
            JobDetail::new(job.clone(), PURGE_JOB_TYPE).with_description("Delete expired measurements"),
            false,
        )?;

        let key = TriggerKey::new(PURGE_JOB_NAME, SYSTEM_NAMESPACE);
        let trigger = Trigger::new(
            key.clone(),
            job,
            Schedule::calendar(1, CalendarUnit::Day),
            Utc::now(),
            None,
        );
        match self.engine.schedule_trigger(trigger) {
            Ok(first_fire) => {
                info!(first_fire = %first_fire, "Measurement purge scheduled");
                Ok(Some(key))
            }
            Err(e) => {
                warn!(error = %e, "Failed to schedule measurement purge");
                Err(e.into())
            }
        }
    }
}

fn validate_identifier(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{what} must not be empty")));
    }
    Ok(())
}

fn build_trigger(key: TriggerKey, job: &JobKey, entry: &ScheduleEntry) -> Trigger {
    Trigger::new(
        key,
        job.clone(),
        entry.unit.to_schedule(entry.interval),
        entry.start,
        entry.end,
    )
    .with_description(entry.to_string())
    .with_data(INTERVAL_DATA_KEY, entry.interval.to_string())
    .with_data(UNIT_DATA_KEY, entry.unit.to_string())
}

fn stated_interval(trigger: &Trigger) -> Option<(u32, IntervalUnit)> {
    let interval = trigger.data().get(INTERVAL_DATA_KEY)?.parse::<u32>().ok()?;
    let unit = trigger.data().get(UNIT_DATA_KEY)?.parse::<IntervalUnit>().ok()?;
    Some((interval, unit))
}

fn entry_of(trigger: &Trigger) -> Option<ScheduleEntry> {
    let (interval, unit) = stated_interval(trigger)
        .or_else(|| IntervalUnit::from_schedule(trigger.schedule()))?;
    Some(
        ScheduleEntry::new(trigger.start_time(), trigger.end_time(), interval, unit)
            .with_id(trigger.key().clone()),
    )
}
