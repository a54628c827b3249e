// PostgreSQL job store

pub mod job;
pub mod queries;
pub mod task;

pub use job::JobRepository;
pub use task::TaskRepository;

use crate::db::store::{mask_jobs, JobStore};
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Job, JobPatch, NewJob, Page, PurgeReport, Task};
use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

/// `JobStore` backed by PostgreSQL
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
    jobs: JobRepository,
    tasks: TaskRepository,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound(format!("job {}", id))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: NewJob) -> Result<Job, DatabaseError> {
        self.jobs.create(&job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, DatabaseError> {
        self.jobs.find_by_id(id).await?.ok_or_else(|| not_found(id))
    }

    async fn get_owned_job(&self, owner_id: &str, id: Uuid) -> Result<Job, DatabaseError> {
        self.jobs
            .find_owned(owner_id, id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<Job>, DatabaseError> {
        Ok(mask_jobs(self.jobs.find_by_owner(owner_id).await?))
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        self.jobs.find_active().await
    }

    async fn update_job(&self, id: Uuid, patch: &JobPatch) -> Result<Job, DatabaseError> {
        self.jobs.update(id, patch).await
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.jobs.delete(id).await
    }

    async fn record_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.tasks.create(task).await
    }

    async fn list_tasks(&self, job_id: Uuid, page: Page) -> Result<Vec<Task>, DatabaseError> {
        self.tasks.find_by_job(job_id, page).await
    }

    async fn last_task(&self, job_id: Uuid) -> Result<Option<Task>, DatabaseError> {
        self.tasks.find_latest(job_id).await
    }

    /// Both deletes run in one transaction. Any error drops the
    /// transaction before commit, which rolls it back.
    #[instrument(skip(self))]
    async fn purge_by_identity(&self, name: &str) -> Result<PurgeReport, DatabaseError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        // Row locks hold off task inserts for these jobs until commit
        let job_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM jobs WHERE name = $1 FOR UPDATE")
                .bind(name)
                .fetch_all(&mut *tx)
                .await?;

        let deleted_task_ids: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM tasks WHERE job_id = ANY($1) RETURNING id")
                .bind(&job_ids)
                .fetch_all(&mut *tx)
                .await?;

        let deleted_job_ids: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM jobs WHERE id = ANY($1) RETURNING id")
                .bind(&job_ids)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::info!(
            jobs = deleted_job_ids.len(),
            tasks = deleted_task_ids.len(),
            "Purged jobs by identity"
        );

        Ok(PurgeReport {
            deleted_job_ids,
            deleted_task_ids,
        })
    }
}
