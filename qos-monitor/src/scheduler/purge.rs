//! Retention of stored measurements.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{error, info};
use trigger_engine::{EngineError, Job, JobExecutionContext, JobExecutionError, JobFactory};

use crate::database::repositories::MeasurementRepository;

/// Deletes measurements older than the retention window, measured back from
/// the firing time.
pub struct MeasurementPurgeJob {
    measurements: Arc<dyn MeasurementRepository>,
    retention: TimeDelta,
    deleted: Option<u64>,
}

impl MeasurementPurgeJob {
    pub fn new(measurements: Arc<dyn MeasurementRepository>, retention: TimeDelta) -> Self {
        Self {
            measurements,
            retention,
            deleted: None,
        }
    }

    /// Rows removed by the last run.
    pub fn deleted(&self) -> Option<u64> {
        self.deleted
    }
}

#[async_trait]
impl Job for MeasurementPurgeJob {
    async fn execute(&mut self, ctx: &JobExecutionContext) -> Result<(), JobExecutionError> {
        let cutoff = ctx.fire_time - self.retention;
        match self.measurements.delete_older_than(cutoff).await {
            Ok(count) => {
                self.deleted = Some(count);
                info!(cutoff = %cutoff, deleted = count, "Expired measurements purged");
                Ok(())
            }
            Err(e) => {
                error!(cutoff = %cutoff, error = %e, "Measurement purge failed");
                Err(JobExecutionError::new(e.to_string()))
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Job factory for the purge job type.
pub struct PurgeJobFactory {
    measurements: Arc<dyn MeasurementRepository>,
    retention: TimeDelta,
}

impl PurgeJobFactory {
    pub fn new(measurements: Arc<dyn MeasurementRepository>, retention: TimeDelta) -> Self {
        Self {
            measurements,
            retention,
        }
    }
}

#[async_trait]
impl JobFactory for PurgeJobFactory {
    async fn new_job(&self, _ctx: &JobExecutionContext) -> Result<Box<dyn Job>, EngineError> {
        Ok(Box::new(MeasurementPurgeJob::new(
            self.measurements.clone(),
            self.retention,
        )))
    }
}
