// Job store abstraction shared by the Postgres and in-memory backends

use crate::errors::DatabaseError;
use crate::models::{Job, JobPatch, NewJob, Page, PurgeReport, Task};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence for jobs and their task history
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new inactive job. `DuplicateKey` when `(owner_id, name)`
    /// already exists.
    async fn create_job(&self, job: NewJob) -> Result<Job, DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Job, DatabaseError>;

    /// Same as `get_job`, but a job owned by someone else is `NotFound`
    async fn get_owned_job(&self, owner_id: &str, id: Uuid) -> Result<Job, DatabaseError>;

    /// Jobs of one owner, newest first, secrets masked
    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<Job>, DatabaseError>;

    /// All active jobs with their raw credentials
    async fn list_active_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    /// Merge the supplied fields into the stored row in one atomic update
    async fn update_job(&self, id: Uuid, patch: &JobPatch) -> Result<Job, DatabaseError>;

    /// Delete a job and its tasks
    async fn delete_job(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn record_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Tasks of a job, newest first
    async fn list_tasks(&self, job_id: Uuid, page: Page) -> Result<Vec<Task>, DatabaseError>;

    async fn last_task(&self, job_id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Delete every job named `name` and all of their tasks, atomically
    async fn purge_by_identity(&self, name: &str) -> Result<PurgeReport, DatabaseError>;
}

/// Mask secrets of every job in a listing
pub(crate) fn mask_jobs(jobs: Vec<Job>) -> Vec<Job> {
    jobs.into_iter()
        .map(|mut job| {
            job.credential = job.credential.masked();
            job.destination_token = job
                .destination_token
                .as_deref()
                .map(crate::credential::mask_secret);
            job
        })
        .collect()
}
