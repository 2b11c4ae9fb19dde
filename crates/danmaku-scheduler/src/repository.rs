//! Durable storage for [`ScheduledTask`] rows.

use async_trait::async_trait;
use danmaku_core::{GatewayError, Result};
use dashmap::DashMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::ScheduledTask;

#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    async fn insert(&self, task: &ScheduledTask) -> Result<()>;
    async fn update(&self, task: &ScheduledTask) -> Result<()>;
    async fn delete(&self, task_id: Uuid) -> Result<()>;
    async fn get(&self, task_id: Uuid) -> Result<Option<ScheduledTask>>;
    async fn get_by_job_type(&self, job_type: &str) -> Result<Option<ScheduledTask>>;
    async fn exists_by_job_type(&self, job_type: &str) -> Result<bool> {
        Ok(self.get_by_job_type(job_type).await?.is_some())
    }
    async fn list_all(&self) -> Result<Vec<ScheduledTask>>;
    async fn update_run_times(
        &self,
        task_id: Uuid,
        last_run_at: Option<chrono::DateTime<chrono::Utc>>,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct InMemoryScheduledTaskRepository {
    rows: std::sync::Arc<DashMap<Uuid, ScheduledTask>>,
}

impl InMemoryScheduledTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduledTaskRepository for InMemoryScheduledTaskRepository {
    async fn insert(&self, task: &ScheduledTask) -> Result<()> {
        self.rows.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &ScheduledTask) -> Result<()> {
        self.rows.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> Result<()> {
        self.rows.remove(&task_id);
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<ScheduledTask>> {
        Ok(self.rows.get(&task_id).map(|e| e.value().clone()))
    }

    async fn get_by_job_type(&self, job_type: &str) -> Result<Option<ScheduledTask>> {
        Ok(self
            .rows
            .iter()
            .find(|e| e.job_type == job_type)
            .map(|e| e.value().clone()))
    }

    async fn list_all(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.rows.iter().map(|e| e.value().clone()).collect())
    }

    async fn update_run_times(
        &self,
        task_id: Uuid,
        last_run_at: Option<chrono::DateTime<chrono::Utc>>,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        if let Some(mut row) = self.rows.get_mut(&task_id) {
            row.last_run_at = last_run_at;
            row.next_run_at = next_run_at;
            Ok(())
        } else {
            Err(GatewayError::NotFound(format!("scheduled task {task_id}")))
        }
    }
}

pub struct PgScheduledTaskRepository {
    pool: PgPool,
}

impl PgScheduledTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduledTaskRepository for PgScheduledTaskRepository {
    async fn insert(&self, task: &ScheduledTask) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduled_task (task_id, name, job_type, cron_expression, is_enabled, last_run_at, next_run_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(task.task_id)
        .bind(&task.name)
        .bind(&task.job_type)
        .bind(&task.cron_expression)
        .bind(task.is_enabled)
        .bind(task.last_run_at)
        .bind(task.next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, task: &ScheduledTask) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_task SET name = $2, cron_expression = $3, is_enabled = $4 WHERE task_id = $1",
        )
        .bind(task.task_id)
        .bind(&task.name)
        .bind(&task.cron_expression)
        .bind(task.is_enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_task WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query_as::<_, ScheduledTask>("SELECT * FROM scheduled_task WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_by_job_type(&self, job_type: &str) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query_as::<_, ScheduledTask>("SELECT * FROM scheduled_task WHERE job_type = $1")
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_all(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query_as::<_, ScheduledTask>("SELECT * FROM scheduled_task")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn update_run_times(
        &self,
        task_id: Uuid,
        last_run_at: Option<chrono::DateTime<chrono::Utc>>,
        next_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_task SET last_run_at = $2, next_run_at = $3 WHERE task_id = $1")
            .bind(task_id)
            .bind(last_run_at)
            .bind(next_run_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
