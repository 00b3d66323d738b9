//! Measurement repository and the per-firing measurement writer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{MeasurementDbModel, ProbeResultDbModel};
use crate::domain::{Measurement, ProbeResult};
use crate::{Error, Result};

/// Persistence handle owned by a single firing.
///
/// Holds a pooled connection from the first save until [`release`] is called.
///
/// [`release`]: MeasurementWriter::release
#[async_trait]
pub trait MeasurementWriter: Send {
    /// Store a measurement with its probe results. Returns the new id.
    async fn save(&mut self, measurement: &Measurement) -> Result<i64>;

    /// Return the connection to the pool. Further saves fail.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Measurement repository trait.
#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    /// Fresh writer for one firing.
    fn writer(&self) -> Box<dyn MeasurementWriter>;

    /// Measurements of a process, newest first, within an optional time range.
    async fn list_measurements(
        &self,
        service_id: &str,
        process_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>>;

    /// Delete every measurement created before `cutoff`. Returns the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// SQLx implementation of MeasurementRepository.
pub struct SqlxMeasurementRepository {
    pool: SqlitePool,
}

impl SqlxMeasurementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn results_for(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<ProbeResult>>> {
        let mut grouped: HashMap<i64, Vec<ProbeResult>> = HashMap::new();
        if ids.is_empty() {
            return Ok(grouped);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT measurement_id, position, probe, value FROM probe_results WHERE measurement_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY measurement_id, position");

        let rows = builder
            .build_query_as::<ProbeResultDbModel>()
            .fetch_all(&self.pool)
            .await?;

        for row in rows {
            let measurement_id = row.measurement_id;
            grouped
                .entry(measurement_id)
                .or_default()
                .push(row.into_domain()?);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl MeasurementRepository for SqlxMeasurementRepository {
    fn writer(&self) -> Box<dyn MeasurementWriter> {
        Box::new(SqlxMeasurementWriter::new(self.pool.clone()))
    }

    async fn list_measurements(
        &self,
        service_id: &str,
        process_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>> {
        let rows = sqlx::query_as::<_, MeasurementDbModel>(
            r#"
            SELECT id, service_id, process_id, created_at FROM measurements
            WHERE service_id = ? AND process_id = ? AND created_at >= ? AND created_at <= ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(service_id)
        .bind(process_id)
        .bind(from.map_or(i64::MIN, |dt| dt.timestamp_millis()))
        .bind(to.map_or(i64::MAX, |dt| dt.timestamp_millis()))
        .bind(limit.map_or(-1, i64::from))
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut results = self.results_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let probes = results.remove(&row.id).unwrap_or_default();
                row.into_domain(probes)
            })
            .collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM measurements WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Writer backed by one pooled connection, acquired lazily.
pub struct SqlxMeasurementWriter {
    pool: SqlitePool,
    conn: Option<PoolConnection<Sqlite>>,
    released: bool,
}

impl SqlxMeasurementWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            conn: None,
            released: false,
        }
    }
}

#[async_trait]
impl MeasurementWriter for SqlxMeasurementWriter {
    async fn save(&mut self, measurement: &Measurement) -> Result<i64> {
        if self.released {
            return Err(Error::other("measurement writer already released"));
        }
        if self.conn.is_none() {
            self.conn = Some(self.pool.acquire().await?);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::other("measurement writer has no connection"));
        };

        let mut tx = conn.begin().await?;
        let id = sqlx::query(
            "INSERT INTO measurements (service_id, process_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(&measurement.service_id)
        .bind(&measurement.process_id)
        .bind(measurement.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, result) in measurement.results.iter().enumerate() {
            sqlx::query(
                "INSERT INTO probe_results (measurement_id, position, probe, value) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(position as i64)
            .bind(&result.probe)
            .bind(serde_json::to_string(&result.value)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    fn release(&mut self) {
        self.conn = None;
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}
