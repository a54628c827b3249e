// Job repository implementation

use super::queries::job_queries;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{
    ConnectorType, Credential, Job, JobPatch, JobStatus, NewJob, Schedule, Severity,
};
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

/// Repository for job-related database operations
#[derive(Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new, inactive job
    #[instrument(skip(self, job), fields(owner_id = %job.owner_id, connector = %job.connector))]
    pub async fn create(&self, job: &NewJob) -> Result<Job, DatabaseError> {
        let now = Utc::now();
        let status = JobStatus::info("Job created");

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO jobs (
                id, owner_id, name, method, input_data, destination_token,
                "interval", "on", active, message, message_status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NULL, NULL, NULL, false, $6, $7, $8, $8)
            RETURNING {}
            "#,
            job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&job.owner_id)
        .bind(&job.name)
        .bind(job.connector.as_str())
        .bind(job.credential.to_input_data())
        .bind(&status.message)
        .bind(status.severity.to_string())
        .bind(now)
        .fetch_one(self.pool.pool())
        .await?;

        let created = job_from_row(&row)?;
        tracing::info!(job_id = %created.id, job_name = %created.name, "Job created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self))]
    pub async fn find_owned(&self, owner_id: &str, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE id = $1 AND owner_id = $2",
            job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Jobs of one owner, newest first
    #[instrument(skip(self))]
    pub async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Job>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE owner_id = $1 ORDER BY created_at DESC, id",
            job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self))]
    pub async fn find_active(&self) -> Result<Vec<Job>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE active = true ORDER BY created_at",
            job_queries::SELECT_ALL_COLUMNS
        ))
        .fetch_all(self.pool.pool())
        .await?;

        let jobs: Vec<Job> = rows.iter().map(job_from_row).collect::<Result<_, _>>()?;
        tracing::debug!(count = jobs.len(), "Loaded active jobs");
        Ok(jobs)
    }

    /// Merge the supplied fields in a single UPDATE. Omitted fields keep
    /// their stored value through COALESCE.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: &JobPatch) -> Result<Job, DatabaseError> {
        let interval = patch.schedule.as_ref().map(|s| s.interval().as_str());
        let on = patch.schedule.as_ref().map(|s| s.on().to_string());
        let input_data = patch.credential.as_ref().map(Credential::to_input_data);
        let message = patch.status.as_ref().map(|s| s.message.clone());
        let message_status = patch.status.as_ref().map(|s| s.severity.to_string());

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET "interval" = COALESCE($2, "interval"),
                "on" = COALESCE($3, "on"),
                input_data = COALESCE($4, input_data),
                destination_token = COALESCE($5, destination_token),
                active = COALESCE($6, active),
                message = COALESCE($7, message),
                message_status = COALESCE($8, message_status),
                updated_at = $9
            WHERE id = $1
            RETURNING {}
            "#,
            job_queries::SELECT_ALL_COLUMNS
        ))
        .bind(id)
        .bind(interval)
        .bind(on)
        .bind(input_data)
        .bind(&patch.destination_token)
        .bind(patch.active)
        .bind(message)
        .bind(message_status)
        .bind(Utc::now())
        .fetch_optional(self.pool.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("job {}", id)))?;

        job_from_row(&row)
    }

    /// Delete a job. Tasks go with it through ON DELETE CASCADE.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("job {}", id)));
        }

        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }
}

fn corrupt(column: &str, reason: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::QueryFailed(format!("Invalid stored {}: {}", column, reason))
}

pub(crate) fn job_from_row(row: &PgRow) -> Result<Job, DatabaseError> {
    let method: String = row.try_get("method")?;
    let connector: ConnectorType = method.parse().map_err(|e| corrupt("method", e))?;

    let input_data: serde_json::Value = row.try_get("input_data")?;
    let credential =
        Credential::from_stored(connector, &input_data).map_err(|e| corrupt("input_data", e))?;

    let interval: Option<String> = row.try_get("interval")?;
    let on: Option<String> = row.try_get("on")?;
    let schedule = match (interval, on) {
        (Some(interval), Some(on)) => {
            Some(Schedule::parse(&interval, &on).map_err(|e| corrupt("schedule", e))?)
        }
        _ => None,
    };

    let message_status: String = row.try_get("message_status")?;
    let severity: Severity = message_status
        .parse()
        .map_err(|e| corrupt("message_status", e))?;

    Ok(Job {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        connector,
        credential,
        destination_token: row.try_get("destination_token")?,
        schedule,
        active: row.try_get("active")?,
        status: JobStatus {
            message: row.try_get("message")?,
            severity,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
