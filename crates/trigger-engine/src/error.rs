//! Engine error types.

use thiserror::Error;

use crate::key::{JobKey, TriggerKey};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the job store and the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Job already exists: {0}")]
    JobExists(JobKey),

    #[error("Job not found: {0}")]
    JobNotFound(JobKey),

    #[error("Trigger already exists: {0}")]
    TriggerExists(TriggerKey),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(TriggerKey),

    #[error("Trigger {0} will never fire")]
    WillNeverFire(TriggerKey),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Failed to instantiate job {key}: {reason}")]
    Instantiation { key: JobKey, reason: String },

    #[error("Scheduler has been shut down")]
    Shutdown,
}

impl EngineError {
    pub fn instantiation(key: &JobKey, reason: impl Into<String>) -> Self {
        Self::Instantiation {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

/// Error returned from [`crate::Job::execute`].
///
/// When `refire_immediately` is set the engine runs the same job instance
/// one more time before reporting to the listener.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct JobExecutionError {
    pub message: String,
    pub refire_immediately: bool,
}

impl JobExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            refire_immediately: false,
        }
    }

    pub fn refire(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            refire_immediately: true,
        }
    }
}
