// Task repository implementation

use super::queries::task_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Page, Task, TaskDetail, TaskOutcome};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

/// Repository for task history
#[derive(Clone)]
pub struct TaskRepository {
    pool: DbPool,
}

impl TaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, job_id = %task.job_id))]
    pub async fn create(&self, task: &Task) -> Result<(), DatabaseError> {
        let detail = serde_json::to_value(&task.detail)
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to serialize detail: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, job_id, started_at, finished_at, outcome, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id)
        .bind(task.job_id)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(task.outcome.to_string())
        .bind(detail)
        .bind(task.created_at)
        .execute(self.pool.pool())
        .await?;

        tracing::debug!(outcome = %task.outcome, "Task recorded");
        Ok(())
    }

    /// One page of a job's tasks, newest first
    #[instrument(skip(self))]
    pub async fn find_by_job(&self, job_id: Uuid, page: Page) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE job_id = $1
            ORDER BY started_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
            task_queries::SELECT_ALL_COLUMNS
        ))
        .bind(job_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip(self))]
    pub async fn find_latest(&self, job_id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE job_id = $1 ORDER BY started_at DESC LIMIT 1",
            task_queries::SELECT_ALL_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }
}

fn task_from_row(row: &PgRow) -> Result<Task, DatabaseError> {
    let outcome: String = row.try_get("outcome")?;
    let outcome: TaskOutcome = outcome
        .parse()
        .map_err(|e: String| DatabaseError::QueryFailed(e))?;

    let detail: serde_json::Value = row.try_get("detail")?;
    let detail: TaskDetail = serde_json::from_value(detail)
        .map_err(|e| DatabaseError::QueryFailed(format!("Invalid stored detail: {}", e)))?;

    Ok(Task {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        outcome,
        detail,
        created_at: row.try_get("created_at")?,
    })
}
