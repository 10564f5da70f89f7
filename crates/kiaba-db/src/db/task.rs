use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use kiaba_core::models::{Task, TaskType};

use crate::db::transaction::TransactionGuard;
use crate::store::{StoreResult, TaskStore, STALE_TASK_ERROR};

const TASK_COLUMNS: &str = r#"
    id,
    task_type,
    status,
    payload,
    result,
    attempts,
    max_attempts,
    scheduled_at,
    started_at,
    completed_at,
    last_error,
    created_at,
    updated_at
"#;

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for TaskRepository {
    #[tracing::instrument(skip(self, payload))]
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        max_attempts: i32,
        scheduled_at: DateTime<Utc>,
    ) -> StoreResult<Task> {
        let task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            INSERT INTO tasks (task_type, status, payload, max_attempts, scheduled_at)
            VALUES ($1, 'pending', $2, $3, $4)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_type.to_string())
        .bind(payload)
        .bind(max_attempts)
        .bind(scheduled_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, task_type = %task_type, "Failed to insert task into database");
            anyhow::anyhow!("Failed to insert task into database: {}", e)
        })?;

        tracing::info!(task_id = %task.id, task_type = %task_type, "Task created");
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let task = sqlx::query_as::<Postgres, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch task")?;

        Ok(task)
    }

    /// Uses FOR UPDATE SKIP LOCKED so concurrent workers never claim the same task.
    #[tracing::instrument(skip(self))]
    async fn claim_next(&self) -> StoreResult<Option<Task>> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let next: Option<Uuid> = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT id
            FROM tasks
            WHERE status = 'pending'
                AND scheduled_at <= NOW()
            ORDER BY scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(tx.conn()?)
        .await
        .context("Failed to fetch next task")?;

        let Some(task_id) = next else {
            tx.rollback().await?;
            return Ok(None);
        };

        let task = sqlx::query_as::<Postgres, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'running',
                attempts = attempts + 1,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .fetch_one(tx.conn()?)
        .await
        .context("Failed to update task status")?;

        tx.commit().await?;

        tracing::debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            attempt = task.attempts,
            "Task claimed"
        );
        Ok(Some(task))
    }

    #[tracing::instrument(skip(self, result))]
    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                last_error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await
        .context("Failed to mark task as completed")?;

        Ok(())
    }

    #[tracing::instrument(skip(self, error))]
    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed',
                last_error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark task as failed")?;

        Ok(())
    }

    #[tracing::instrument(skip(self, error))]
    async fn reschedule(&self, id: Uuid, at: DateTime<Utc>, error: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                scheduled_at = $2,
                last_error = $3,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule task")?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reap_stale_running(&self, started_before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                scheduled_at = NOW(),
                completed_at = CASE WHEN attempts >= max_attempts THEN NOW() ELSE NULL END,
                started_at = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at < $1
            "#,
        )
        .bind(started_before)
        .bind(STALE_TASK_ERROR)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::warn!(count = reaped, "Reaped stale running tasks");
        }
        Ok(reaped)
    }
}
