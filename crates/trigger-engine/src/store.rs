//! In-memory job store.
//!
//! Holds job definitions, their triggers and the set of paused jobs. All
//! access goes through the scheduler's lock, so every method here observes a
//! consistent snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::job::{JobDetail, JobExecutionContext};
use crate::key::{JobKey, TriggerKey};
use crate::trigger::{Trigger, TriggerState};

#[derive(Debug, Default)]
pub(crate) struct JobStore {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, Trigger>,
    paused_jobs: HashSet<JobKey>,
}

impl JobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store a job. Replacing keeps the triggers already attached to it.
    pub(crate) fn store_job(&mut self, detail: JobDetail, replace: bool) -> Result<()> {
        let key = detail.key().clone();
        if !replace && self.jobs.contains_key(&key) {
            return Err(EngineError::JobExists(key));
        }
        self.jobs.insert(key, detail);
        Ok(())
    }

    /// Remove a job together with all of its triggers.
    pub(crate) fn remove_job(&mut self, key: &JobKey) -> bool {
        let existed = self.jobs.remove(key).is_some();
        self.triggers.retain(|_, t| t.job_key() != key);
        self.paused_jobs.remove(key);
        existed
    }

    pub(crate) fn job(&self, key: &JobKey) -> Option<&JobDetail> {
        self.jobs.get(key)
    }

    pub(crate) fn trigger(&self, key: &TriggerKey) -> Option<&Trigger> {
        self.triggers.get(key)
    }

    /// Store a trigger whose first fire time has already been computed.
    pub(crate) fn store_trigger(&mut self, mut trigger: Trigger) -> Result<()> {
        if !self.jobs.contains_key(trigger.job_key()) {
            return Err(EngineError::JobNotFound(trigger.job_key().clone()));
        }
        if self.triggers.contains_key(trigger.key()) {
            return Err(EngineError::TriggerExists(trigger.key().clone()));
        }
        if self.paused_jobs.contains(trigger.job_key()) {
            trigger.pause();
        }
        self.triggers.insert(trigger.key().clone(), trigger);
        Ok(())
    }

    /// Remove a trigger. A non-durable job left without triggers goes too.
    pub(crate) fn remove_trigger(&mut self, key: &TriggerKey) -> bool {
        let Some(removed) = self.triggers.remove(key) else {
            return false;
        };
        self.remove_orphaned_job(removed.job_key());
        true
    }

    /// Swap `old` for `new` in one step.
    pub(crate) fn replace_trigger(&mut self, old: &TriggerKey, mut new: Trigger) -> Result<()> {
        if !self.triggers.contains_key(old) {
            return Err(EngineError::TriggerNotFound(old.clone()));
        }
        if !self.jobs.contains_key(new.job_key()) {
            return Err(EngineError::JobNotFound(new.job_key().clone()));
        }
        if new.key() != old && self.triggers.contains_key(new.key()) {
            return Err(EngineError::TriggerExists(new.key().clone()));
        }
        if self.paused_jobs.contains(new.job_key()) {
            new.pause();
        }
        self.triggers.remove(old);
        self.triggers.insert(new.key().clone(), new);
        Ok(())
    }

    pub(crate) fn triggers_of_job(&self, key: &JobKey) -> Vec<Trigger> {
        let mut triggers: Vec<Trigger> = self
            .triggers
            .values()
            .filter(|t| t.job_key() == key)
            .cloned()
            .collect();
        triggers.sort_by(|a, b| a.key().cmp(b.key()));
        triggers
    }

    pub(crate) fn pause_job(&mut self, key: &JobKey) -> Result<()> {
        if !self.jobs.contains_key(key) {
            return Err(EngineError::JobNotFound(key.clone()));
        }
        self.paused_jobs.insert(key.clone());
        for trigger in self.triggers.values_mut().filter(|t| t.job_key() == key) {
            trigger.pause();
        }
        Ok(())
    }

    pub(crate) fn resume_job(
        &mut self,
        key: &JobKey,
        now: DateTime<Utc>,
        tz: &Tz,
        misfire_threshold: TimeDelta,
    ) -> Result<()> {
        if !self.jobs.contains_key(key) {
            return Err(EngineError::JobNotFound(key.clone()));
        }
        self.paused_jobs.remove(key);
        for trigger in self.triggers.values_mut().filter(|t| t.job_key() == key) {
            trigger.resume(now, tz, misfire_threshold);
        }
        self.triggers.retain(|_, t| t.state() != TriggerState::Complete);
        Ok(())
    }

    pub(crate) fn is_job_paused(&self, key: &JobKey) -> bool {
        self.paused_jobs.contains(key)
    }

    pub(crate) fn job_group_names(&self) -> Vec<String> {
        let groups: BTreeSet<&str> = self.jobs.keys().map(JobKey::group).collect();
        groups.into_iter().map(str::to_string).collect()
    }

    pub(crate) fn trigger_group_names(&self) -> Vec<String> {
        let groups: BTreeSet<&str> = self.triggers.keys().map(TriggerKey::group).collect();
        groups.into_iter().map(str::to_string).collect()
    }

    pub(crate) fn job_keys(&self, group: &str) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self
            .jobs
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn trigger_keys(&self, group: &str) -> Vec<TriggerKey> {
        let mut keys: Vec<TriggerKey> = self
            .triggers
            .keys()
            .filter(|k| k.group() == group)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Earliest fire time among triggers that may fire.
    pub(crate) fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.triggers
            .values()
            .filter(|t| t.state() == TriggerState::Normal)
            .filter_map(Trigger::next_fire_time)
            .min()
    }

    /// Advance every due trigger and return one context per firing.
    ///
    /// Triggers that have no further fire time are removed.
    pub(crate) fn acquire_due(&mut self, now: DateTime<Utc>, tz: &Tz) -> Vec<JobExecutionContext> {
        let mut fired = Vec::new();
        let mut completed = Vec::new();

        for trigger in self.triggers.values_mut() {
            if trigger.state() != TriggerState::Normal {
                continue;
            }
            let Some(scheduled) = trigger.next_fire_time() else {
                continue;
            };
            if scheduled > now {
                continue;
            }
            let Some(detail) = self.jobs.get(trigger.job_key()) else {
                continue;
            };

            let snapshot = trigger.clone();
            trigger.triggered(now, tz);

            fired.push(JobExecutionContext {
                job_detail: detail.clone(),
                trigger: snapshot,
                fire_time: now,
                scheduled_fire_time: scheduled,
                next_fire_time: trigger.next_fire_time(),
                refire_count: 0,
            });

            if trigger.state() == TriggerState::Complete {
                completed.push(trigger.key().clone());
            }
        }

        for key in completed {
            debug!(trigger = %key, "Trigger completed, removing");
            self.remove_trigger(&key);
        }

        fired
    }

    fn remove_orphaned_job(&mut self, key: &JobKey) {
        let durable = self.jobs.get(key).is_some_and(JobDetail::is_durable);
        let has_triggers = self.triggers.values().any(|t| t.job_key() == key);
        if !durable && !has_triggers && self.jobs.remove(key).is_some() {
            self.paused_jobs.remove(key);
            debug!(job = %key, "Removed non-durable job without triggers");
        }
    }
}
