//! Job definitions and the global hooks used while firing.

use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{EngineError, JobExecutionError};
use crate::key::{JobKey, TriggerKey};
use crate::trigger::Trigger;

/// Free-form string properties attached to a job definition.
pub type JobDataMap = HashMap<String, String>;

/// Constructor used by [`SimpleJobFactory`].
type JobConstructor = fn() -> Box<dyn Job>;

fn construct<J: Job + Default>() -> Box<dyn Job> {
    Box::new(J::default())
}

/// Stored definition of a job.
///
/// The `job_type` tag tells the job factory which kind of job to build.
#[derive(Debug, Clone)]
pub struct JobDetail {
    key: JobKey,
    job_type: String,
    durable: bool,
    description: Option<String>,
    data: JobDataMap,
    constructor: Option<JobConstructor>,
}

impl JobDetail {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            durable: false,
            description: None,
            data: JobDataMap::new(),
            constructor: None,
        }
    }

    /// Durable jobs stay in the store after their last trigger is removed.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Allow [`SimpleJobFactory`] to build this job without any wiring.
    pub fn with_default_constructor<J: Job + Default>(mut self) -> Self {
        self.constructor = Some(construct::<J>);
        self
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn data(&self) -> &JobDataMap {
        &self.data
    }

    /// Copy of this definition under another key.
    pub fn with_key(&self, key: JobKey) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }

    pub(crate) fn constructor(&self) -> Option<JobConstructor> {
        self.constructor
    }
}

/// Everything known about one firing.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    pub job_detail: JobDetail,
    /// Snapshot of the trigger taken right before it was advanced.
    pub trigger: Trigger,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: DateTime<Utc>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub refire_count: u32,
}

impl JobExecutionContext {
    pub fn job_key(&self) -> &JobKey {
        self.job_detail.key()
    }

    pub fn trigger_key(&self) -> &TriggerKey {
        self.trigger.key()
    }
}

/// A unit of work created for a single firing.
#[async_trait]
pub trait Job: Send + 'static {
    async fn execute(&mut self, ctx: &JobExecutionContext) -> Result<(), JobExecutionError>;

    /// Allows listeners to inspect the concrete job after execution.
    fn as_any(&self) -> &dyn Any;
}

/// The engine's single job-instantiation hook.
#[async_trait]
pub trait JobFactory: Send + Sync {
    async fn new_job(&self, ctx: &JobExecutionContext) -> Result<Box<dyn Job>, EngineError>;
}

/// Builds jobs from the default constructor stored in their [`JobDetail`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleJobFactory;

#[async_trait]
impl JobFactory for SimpleJobFactory {
    async fn new_job(&self, ctx: &JobExecutionContext) -> Result<Box<dyn Job>, EngineError> {
        match ctx.job_detail.constructor() {
            Some(constructor) => Ok(constructor()),
            None => Err(EngineError::instantiation(
                ctx.job_key(),
                format!(
                    "job type '{}' has no default constructor",
                    ctx.job_detail.job_type()
                ),
            )),
        }
    }
}

/// The engine's single post-execution hook.
///
/// Called on the firing task right after the job finished. Implementations
/// must return quickly.
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    fn job_was_executed(
        &self,
        ctx: &JobExecutionContext,
        job: &dyn Job,
        error: Option<&JobExecutionError>,
    );
}
