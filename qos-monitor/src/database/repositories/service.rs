//! Service repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::is_unique_violation;
use crate::database::models::ServiceDbModel;
use crate::database::time::now_ms;
use crate::domain::Service;
use crate::{Error, Result};

/// Service repository trait.
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn find_service(&self, id: &str) -> Result<Option<Service>>;
    /// Returns `false` when a service with the same id already exists.
    async fn create_service(&self, service: &Service) -> Result<bool>;
    async fn update_service(&self, service: &Service) -> Result<Service>;
    /// Change a service id. Processes and measurements follow through the
    /// foreign key cascade.
    async fn rename_service(&self, old_id: &str, new_id: &str) -> Result<()>;
    /// Delete a service with its processes and measurements.
    async fn delete_service(&self, id: &str) -> Result<bool>;
    async fn list_services(&self) -> Result<Vec<Service>>;
}

/// SQLx implementation of ServiceRepository.
pub struct SqlxServiceRepository {
    pool: SqlitePool,
}

impl SqlxServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceRepository for SqlxServiceRepository {
    async fn find_service(&self, id: &str) -> Result<Option<Service>> {
        let row = sqlx::query_as::<_, ServiceDbModel>("SELECT * FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Service::from))
    }

    async fn create_service(&self, service: &Service) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            "INSERT INTO services (id, address, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&service.id)
        .bind(&service.address)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        let result = sqlx::query("UPDATE services SET address = ?, updated_at = ? WHERE id = ?")
            .bind(&service.address)
            .bind(now_ms())
            .bind(&service.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Service", &service.id));
        }
        Ok(service.clone())
    }

    async fn rename_service(&self, old_id: &str, new_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE services SET id = ?, updated_at = ? WHERE id = ?")
            .bind(new_id)
            .bind(now_ms())
            .bind(old_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => Err(Error::not_found("Service", old_id)),
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::validation(format!(
                "service '{new_id}' already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_service(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, ServiceDbModel>("SELECT * FROM services ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Service::from).collect())
    }
}
