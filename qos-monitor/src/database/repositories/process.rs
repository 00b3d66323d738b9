//! Monitored process repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::is_unique_violation;
use crate::database::models::ProcessDbModel;
use crate::database::time::now_ms;
use crate::domain::MonitoredProcess;
use crate::{Error, Result};

/// Process repository trait.
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    async fn find_process(&self, service_id: &str, id: &str) -> Result<Option<MonitoredProcess>>;
    /// Returns `false` when the process already exists on that service.
    async fn create_process(&self, process: &MonitoredProcess) -> Result<bool>;
    async fn update_process(&self, process: &MonitoredProcess) -> Result<MonitoredProcess>;
    async fn delete_process(&self, service_id: &str, id: &str) -> Result<bool>;
    async fn list_processes(&self, service_id: &str) -> Result<Vec<MonitoredProcess>>;
    /// Unconditionally set the error flag. Returns whether the process exists.
    async fn set_error_flag(&self, service_id: &str, id: &str, error: bool) -> Result<bool>;
    /// Set the error flag only if it is currently clear.
    ///
    /// Returns `true` for exactly one caller among concurrent attempts.
    async fn mark_failed(&self, service_id: &str, id: &str) -> Result<bool>;
}

/// SQLx implementation of ProcessRepository.
pub struct SqlxProcessRepository {
    pool: SqlitePool,
}

impl SqlxProcessRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessRepository for SqlxProcessRepository {
    async fn find_process(&self, service_id: &str, id: &str) -> Result<Option<MonitoredProcess>> {
        let row = sqlx::query_as::<_, ProcessDbModel>(
            "SELECT * FROM processes WHERE service_id = ? AND id = ?",
        )
        .bind(service_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MonitoredProcess::from))
    }

    async fn create_process(&self, process: &MonitoredProcess) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO processes (service_id, id, request_template, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&process.service_id)
        .bind(&process.id)
        .bind(&process.request_template)
        .bind(process.error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                Err(Error::not_found("Service", &process.service_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_process(&self, process: &MonitoredProcess) -> Result<MonitoredProcess> {
        let result = sqlx::query(
            r#"
            UPDATE processes SET request_template = ?, error = ?, updated_at = ?
            WHERE service_id = ? AND id = ?
            "#,
        )
        .bind(&process.request_template)
        .bind(process.error)
        .bind(now_ms())
        .bind(&process.service_id)
        .bind(&process.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(
                "Process",
                format!("{}/{}", process.service_id, process.id),
            ));
        }
        Ok(process.clone())
    }

    async fn delete_process(&self, service_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM processes WHERE service_id = ? AND id = ?")
            .bind(service_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_processes(&self, service_id: &str) -> Result<Vec<MonitoredProcess>> {
        let rows = sqlx::query_as::<_, ProcessDbModel>(
            "SELECT * FROM processes WHERE service_id = ? ORDER BY id",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MonitoredProcess::from).collect())
    }

    async fn set_error_flag(&self, service_id: &str, id: &str, error: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE processes SET error = ?, updated_at = ? WHERE service_id = ? AND id = ?",
        )
        .bind(error)
        .bind(now_ms())
        .bind(service_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, service_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processes SET error = 1, updated_at = ?
            WHERE service_id = ? AND id = ? AND error = 0
            "#,
        )
        .bind(now_ms())
        .bind(service_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
