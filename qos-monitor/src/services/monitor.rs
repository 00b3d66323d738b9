//! Operator-facing control surface over services, processes and schedules.
//!
//! Persistence is written first; the scheduler is updated only once the
//! row change succeeded. Schedules are the exception: their identity comes
//! from the scheduler, so the trigger is attached first and detached again
//! when the row cannot be written. Missing entities are reported as
//! `Ok(false)`, `Ok(None)` or [`ProcessStatus::NotFound`] rather than as errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use trigger_engine::{EngineError, JobKey, TriggerKey};
use url::Url;

use crate::database::repositories::{
    MeasurementRepository, ProcessRepository, ScheduleRepository, ServiceRepository,
};
use crate::domain::{Measurement, MonitoredProcess, ProcessStatus, ScheduleEntry, Service};
use crate::scheduler::{MonitorScheduler, ProcessCache, SYSTEM_NAMESPACE};
use crate::{Error, Result};

pub struct MonitorService {
    services: Arc<dyn ServiceRepository>,
    processes: Arc<dyn ProcessRepository>,
    measurements: Arc<dyn MeasurementRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    scheduler: Arc<MonitorScheduler>,
    cache: Arc<ProcessCache>,
}

impl MonitorService {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        processes: Arc<dyn ProcessRepository>,
        measurements: Arc<dyn MeasurementRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        scheduler: Arc<MonitorScheduler>,
        cache: Arc<ProcessCache>,
    ) -> Self {
        Self {
            services,
            processes,
            measurements,
            schedules,
            scheduler,
            cache,
        }
    }

    pub fn scheduler(&self) -> &MonitorScheduler {
        &self.scheduler
    }

    // ========== Services ==========

    pub async fn create_service(&self, id: &str, address: &str) -> Result<Service> {
        validate_service_id(id)?;
        validate_address(address)?;

        let service = Service::new(id, address);
        if !self.services.create_service(&service).await? {
            return Err(Error::validation(format!("service {id} already exists")));
        }
        info!(service = id, address, "Service created");
        Ok(service)
    }

    /// Point a service at a new address. Cached definitions are dropped so
    /// the next firing resolves the new address.
    pub async fn update_service_address(&self, id: &str, address: &str) -> Result<Service> {
        validate_address(address)?;
        let service = self
            .services
            .update_service(&Service::new(id, address))
            .await?;
        self.cache.invalidate(id);
        info!(service = id, address, "Service address updated");
        Ok(service)
    }

    /// Rename a service and move every process job to the new namespace.
    /// Returns the number of jobs moved.
    pub async fn rename_service(&self, old_id: &str, new_id: &str) -> Result<usize> {
        validate_service_id(new_id)?;
        if old_id == new_id {
            return Ok(0);
        }

        self.services.rename_service(old_id, new_id).await?;
        let moved = self.scheduler.rename_namespace(old_id, new_id)?;

        // Moved triggers got fresh identities; the rows followed the rename
        // through the cascade and are rewritten to match.
        for job in self.scheduler.jobs_in(new_id) {
            let entries = self.scheduler.list_schedules_of(&job);
            self.schedules
                .replace_schedules(new_id, job.name(), &entries)
                .await?;
        }
        info!(from = old_id, to = new_id, jobs = moved, "Service renamed");
        Ok(moved)
    }

    /// Delete a service with its processes, jobs and measurements.
    pub async fn delete_service(&self, id: &str) -> Result<bool> {
        for job in self.scheduler.jobs_in(id) {
            if let Err(e) = self.scheduler.remove_job(&job) {
                warn!(job = %job, error = %e, "Failed to remove process job");
            }
        }
        self.cache.invalidate(id);

        let deleted = self.services.delete_service(id).await?;
        if deleted {
            info!(service = id, "Service deleted");
        }
        Ok(deleted)
    }

    pub async fn list_services(&self) -> Result<Vec<Service>> {
        self.services.list_services().await
    }

    // ========== Processes ==========

    /// Persist a process and register its durable job.
    pub async fn create_process(
        &self,
        service_id: &str,
        process_id: &str,
        request_template: &str,
    ) -> Result<MonitoredProcess> {
        if process_id.trim().is_empty() {
            return Err(Error::validation("process id must not be empty"));
        }
        let service = self
            .services
            .find_service(service_id)
            .await?
            .ok_or_else(|| Error::not_found("Service", service_id))?;

        let process = MonitoredProcess::new(service_id, process_id, request_template);
        if !self.processes.create_process(&process).await? {
            return Err(Error::validation(format!(
                "process {process_id} already exists on {service_id}"
            )));
        }

        if let Err(e) = self.scheduler.register_job(service_id, process_id) {
            warn!(service = service_id, process = process_id, error = %e, "Job registration failed, rolling back");
            self.processes.delete_process(service_id, process_id).await?;
            return Err(e);
        }
        self.cache.register(&service, &process);

        info!(service = service_id, process = process_id, "Process created");
        Ok(process)
    }

    /// Remove a process, its job and its schedules.
    pub async fn delete_process(&self, service_id: &str, process_id: &str) -> Result<bool> {
        let job = MonitorScheduler::job_key(service_id, process_id);
        match self.scheduler.remove_job(&job) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(job = %job, "Process had no job"),
            Err(e) => return Err(e),
        }

        let deleted = self.processes.delete_process(service_id, process_id).await?;
        if deleted {
            info!(service = service_id, process = process_id, "Process deleted");
        }
        Ok(deleted)
    }

    /// Clear the error flag, then resume probing.
    pub async fn resume_process(&self, service_id: &str, process_id: &str) -> Result<bool> {
        if !self
            .processes
            .set_error_flag(service_id, process_id, false)
            .await?
        {
            return Ok(false);
        }
        self.scheduler
            .resume_job(&MonitorScheduler::job_key(service_id, process_id))?;
        info!(service = service_id, process = process_id, "Monitoring resumed");
        Ok(true)
    }

    pub async fn process_status(&self, service_id: &str, process_id: &str) -> Result<ProcessStatus> {
        let job = MonitorScheduler::job_key(service_id, process_id);
        let Some(process) = self.processes.find_process(service_id, process_id).await? else {
            return Ok(ProcessStatus::NotFound);
        };
        if !self.scheduler.is_job_registered(&job) {
            return Ok(ProcessStatus::NotFound);
        }
        if process.error || self.scheduler.is_paused(&job) {
            Ok(ProcessStatus::Paused)
        } else {
            Ok(ProcessStatus::Monitoring)
        }
    }

    pub async fn list_processes(&self, service_id: &str) -> Result<Vec<MonitoredProcess>> {
        self.processes.list_processes(service_id).await
    }

    /// Re-register jobs and their persisted schedules for every process.
    /// Processes left in the failed state stay paused. Returns the number
    /// of jobs registered.
    pub async fn restore_jobs(&self) -> Result<usize> {
        let mut restored = 0;
        let mut schedules = 0;
        for service in self.services.list_services().await? {
            for process in self.processes.list_processes(&service.id).await? {
                let job = self.scheduler.register_job(&service.id, &process.id)?;
                if process.error {
                    self.scheduler.pause_job(&job)?;
                }
                schedules += self.restore_schedules(&job).await?;
                self.cache.register(&service, &process);
                restored += 1;
            }
        }
        info!(jobs = restored, schedules, "Process jobs restored");
        Ok(restored)
    }

    async fn restore_schedules(&self, job: &JobKey) -> Result<usize> {
        let mut restored = 0;
        for entry in self.schedules.list_schedules(job.group(), job.name()).await? {
            match self.scheduler.restore_schedule(job, &entry) {
                Ok(_) => restored += 1,
                Err(Error::Scheduling(EngineError::WillNeverFire(key))) => {
                    debug!(trigger = %key, "Schedule has ended, dropping it");
                    self.schedules.delete_schedule(key.name()).await?;
                }
                Err(Error::Scheduling(EngineError::TriggerExists(key))) => {
                    debug!(trigger = %key, "Schedule already attached");
                }
                Err(e) => {
                    warn!(job = %job, schedule = %entry, error = %e, "Failed to restore schedule");
                }
            }
        }
        Ok(restored)
    }

    // ========== Schedules ==========

    /// Parse the compact notation and attach it to a process job.
    pub async fn attach_schedule(
        &self,
        service_id: &str,
        process_id: &str,
        notation: &str,
    ) -> Result<ScheduleEntry> {
        let entry = notation
            .parse::<ScheduleEntry>()
            .map_err(|e| Error::validation(e.to_string()))?;
        let key = self
            .scheduler
            .attach_schedule(&MonitorScheduler::job_key(service_id, process_id), &entry)?;
        let entry = entry.with_id(key.clone());

        if let Err(e) = self
            .schedules
            .create_schedule(service_id, process_id, &entry)
            .await
        {
            warn!(trigger = %key, error = %e, "Schedule persistence failed, detaching");
            if let Err(detach) = self.scheduler.remove_schedule(&key) {
                warn!(trigger = %key, error = %detach, "Failed to detach schedule");
            }
            return Err(e);
        }
        Ok(entry)
    }

    /// Replace the cadence of an attached schedule.
    pub async fn update_schedule(&self, trigger: &TriggerKey, notation: &str) -> Result<ScheduleEntry> {
        let entry = notation
            .parse::<ScheduleEntry>()
            .map_err(|e| Error::validation(e.to_string()))?
            .with_id(trigger.clone());
        self.scheduler.update_schedule(&entry)?;
        if !self.schedules.update_schedule(&entry).await? {
            warn!(trigger = %trigger, "Updated schedule has no stored row");
        }
        Ok(entry)
    }

    pub async fn remove_schedule(&self, trigger: &TriggerKey) -> Result<bool> {
        let detached = match self.scheduler.remove_schedule(trigger) {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        let deleted = self.schedules.delete_schedule(trigger.name()).await?;
        Ok(detached || deleted)
    }

    pub fn list_schedules(&self, service_id: &str, process_id: &str) -> Vec<ScheduleEntry> {
        self.scheduler
            .list_schedules_of(&MonitorScheduler::job_key(service_id, process_id))
    }

    // ========== Measurements ==========

    pub async fn list_measurements(
        &self,
        service_id: &str,
        process_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>> {
        self.measurements
            .list_measurements(service_id, process_id, from, to, limit)
            .await
    }
}

fn validate_service_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::validation("service id must not be empty"));
    }
    if id == SYSTEM_NAMESPACE {
        return Err(Error::validation(format!("service id {id} is reserved")));
    }
    Ok(())
}

fn validate_address(address: &str) -> Result<()> {
    Url::parse(address)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("invalid service address {address:?}: {e}")))
}
