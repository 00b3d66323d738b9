//! Row models mirroring the schema in `migrations/`.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use trigger_engine::TriggerKey;

use super::time::ms_to_datetime;
use crate::domain::{IntervalUnit, Measurement, MonitoredProcess, ProbeResult, ScheduleEntry, Service};

/// `services` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ServiceDbModel {
    pub id: String,
    pub address: String,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC) when last updated.
    pub updated_at: i64,
}

impl From<ServiceDbModel> for Service {
    fn from(row: ServiceDbModel) -> Self {
        Service::new(row.id, row.address)
    }
}

/// `processes` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessDbModel {
    pub service_id: String,
    pub id: String,
    pub request_template: String,
    pub error: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ProcessDbModel> for MonitoredProcess {
    fn from(row: ProcessDbModel) -> Self {
        MonitoredProcess {
            service_id: row.service_id,
            id: row.id,
            request_template: row.request_template,
            error: row.error,
        }
    }
}

/// `measurements` row.
#[derive(Debug, Clone, FromRow)]
pub struct MeasurementDbModel {
    pub id: i64,
    pub service_id: String,
    pub process_id: String,
    pub created_at: i64,
}

impl MeasurementDbModel {
    pub fn into_domain(self, results: Vec<ProbeResult>) -> Measurement {
        Measurement {
            id: Some(self.id),
            service_id: self.service_id,
            process_id: self.process_id,
            created_at: ms_to_datetime(self.created_at),
            results,
        }
    }
}

/// `probe_results` row. `value` holds the JSON payload as text.
#[derive(Debug, Clone, FromRow)]
pub struct ProbeResultDbModel {
    pub measurement_id: i64,
    pub position: i64,
    pub probe: String,
    pub value: String,
}

impl ProbeResultDbModel {
    pub fn into_domain(self) -> crate::Result<ProbeResult> {
        Ok(ProbeResult {
            probe: self.probe,
            value: serde_json::from_str(&self.value)?,
        })
    }
}

/// `schedules` row.
#[derive(Debug, Clone, FromRow)]
pub struct ScheduleDbModel {
    pub id: String,
    pub service_id: String,
    pub process_id: String,
    pub start_at: i64,
    pub end_at: Option<i64>,
    pub interval_count: i64,
    pub interval_unit: String,
    pub created_at: i64,
}

impl ScheduleDbModel {
    pub fn into_domain(self) -> crate::Result<ScheduleEntry> {
        let unit = self.interval_unit.parse::<IntervalUnit>().map_err(|_| {
            crate::Error::other(format!(
                "schedule {} has unknown interval unit '{}'",
                self.id, self.interval_unit
            ))
        })?;
        let interval = u32::try_from(self.interval_count).map_err(|_| {
            crate::Error::other(format!(
                "schedule {} has invalid interval {}",
                self.id, self.interval_count
            ))
        })?;

        Ok(ScheduleEntry::new(
            ms_to_datetime(self.start_at),
            self.end_at.map(ms_to_datetime),
            interval,
            unit,
        )
        .with_id(TriggerKey::new(self.id, self.service_id)))
    }
}
