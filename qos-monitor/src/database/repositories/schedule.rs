//! Schedule repository.
//!
//! Keeps the cadences attached to process jobs so they survive a restart.
//! Rows follow their process through the foreign key cascade.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::is_unique_violation;
use crate::database::models::ScheduleDbModel;
use crate::database::time::now_ms;
use crate::domain::ScheduleEntry;
use crate::{Error, Result};

/// Schedule repository trait.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Store an entry that already has its trigger identity.
    async fn create_schedule(
        &self,
        service_id: &str,
        process_id: &str,
        entry: &ScheduleEntry,
    ) -> Result<()>;
    /// Overwrite the cadence of a stored entry. Returns whether it existed.
    async fn update_schedule(&self, entry: &ScheduleEntry) -> Result<bool>;
    async fn delete_schedule(&self, id: &str) -> Result<bool>;
    /// Entries of a process, ordered by id.
    async fn list_schedules(
        &self,
        service_id: &str,
        process_id: &str,
    ) -> Result<Vec<ScheduleEntry>>;
    /// Replace every entry of a process in one transaction.
    async fn replace_schedules(
        &self,
        service_id: &str,
        process_id: &str,
        entries: &[ScheduleEntry],
    ) -> Result<()>;
}

/// SQLx implementation of ScheduleRepository.
pub struct SqlxScheduleRepository {
    pool: SqlitePool,
}

impl SqlxScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entry_id(entry: &ScheduleEntry) -> Result<&str> {
    entry
        .id
        .as_ref()
        .map(|key| key.name())
        .ok_or_else(|| Error::validation("schedule entry has no trigger identity"))
}

async fn insert_schedule(
    tx: &mut Transaction<'_, Sqlite>,
    service_id: &str,
    process_id: &str,
    entry: &ScheduleEntry,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO schedules
            (id, service_id, process_id, start_at, end_at, interval_count, interval_unit, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry_id(entry)?)
    .bind(service_id)
    .bind(process_id)
    .bind(entry.start.timestamp_millis())
    .bind(entry.end.map(|end| end.timestamp_millis()))
    .bind(i64::from(entry.interval))
    .bind(entry.unit.to_string())
    .bind(now_ms())
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(Error::validation(format!(
            "schedule {} already exists",
            entry_id(entry)?
        ))),
        Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => Err(
            Error::not_found("Process", format!("{service_id}/{process_id}")),
        ),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ScheduleRepository for SqlxScheduleRepository {
    async fn create_schedule(
        &self,
        service_id: &str,
        process_id: &str,
        entry: &ScheduleEntry,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_schedule(&mut tx, service_id, process_id, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_schedule(&self, entry: &ScheduleEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE schedules SET start_at = ?, end_at = ?, interval_count = ?, interval_unit = ?
            WHERE id = ?
            "#,
        )
        .bind(entry.start.timestamp_millis())
        .bind(entry.end.map(|end| end.timestamp_millis()))
        .bind(i64::from(entry.interval))
        .bind(entry.unit.to_string())
        .bind(entry_id(entry)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_schedules(
        &self,
        service_id: &str,
        process_id: &str,
    ) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query_as::<_, ScheduleDbModel>(
            "SELECT * FROM schedules WHERE service_id = ? AND process_id = ? ORDER BY id",
        )
        .bind(service_id)
        .bind(process_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ScheduleDbModel::into_domain).collect()
    }

    async fn replace_schedules(
        &self,
        service_id: &str,
        process_id: &str,
        entries: &[ScheduleEntry],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM schedules WHERE service_id = ? AND process_id = ?")
            .bind(service_id)
            .bind(process_id)
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            insert_schedule(&mut tx, service_id, process_id, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
