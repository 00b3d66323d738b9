//! Services and the processes probed on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use trigger_engine::JobKey;

/// A remote endpoint. Its id is the scheduler namespace of its processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub address: String,
}

impl Service {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// One probeable operation on a [`Service`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredProcess {
    pub service_id: String,
    pub id: String,
    /// Raw request sent to the service on every firing.
    pub request_template: String,
    /// Set by the failure supervisor, cleared by an explicit resume.
    pub error: bool,
}

impl MonitoredProcess {
    pub fn new(
        service_id: impl Into<String>,
        id: impl Into<String>,
        request_template: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            id: id.into(),
            request_template: request_template.into(),
            error: false,
        }
    }

    /// Scheduler identity: (service id as group, process id as name).
    pub fn job_key(&self) -> JobKey {
        JobKey::new(&self.id, &self.service_id)
    }
}

/// Operator-facing monitoring status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Monitoring,
    Paused,
    NotFound,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Monitoring => "monitoring in progress",
            Self::Paused => "monitoring paused",
            Self::NotFound => "process not found",
        };
        f.write_str(text)
    }
}
