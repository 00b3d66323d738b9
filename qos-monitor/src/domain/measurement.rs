//! Probe cycle output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One probe's metric for one measurement.
///
/// The payload is free-form JSON so that probes stay pluggable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: String,
    pub value: serde_json::Value,
}

impl ProbeResult {
    pub fn new(probe: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            probe: probe.into(),
            value: value.into(),
        }
    }
}

/// Results of one successful firing, stamped with the request send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Assigned by the store; `None` until persisted.
    pub id: Option<i64>,
    pub service_id: String,
    pub process_id: String,
    pub created_at: DateTime<Utc>,
    pub results: Vec<ProbeResult>,
}

impl Measurement {
    pub fn new(
        service_id: impl Into<String>,
        process_id: impl Into<String>,
        created_at: DateTime<Utc>,
        results: Vec<ProbeResult>,
    ) -> Self {
        Self {
            id: None,
            service_id: service_id.into(),
            process_id: process_id.into(),
            created_at,
            results,
        }
    }
}
