// In-memory job store for tests and single-process deployments

use crate::db::store::{mask_jobs, JobStore};
use crate::errors::DatabaseError;
use crate::models::{Job, JobPatch, JobStatus, NewJob, Page, PurgeReport, Task};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Statements of a purge that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    PurgeTasks,
    PurgeJobs,
}

#[derive(Debug, Clone, Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    tasks: HashMap<Uuid, Task>,
}

/// `JobStore` held in process memory. Every operation holds one lock for
/// its whole duration, so each is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
    faults: Mutex<HashSet<FaultPoint>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given purge step fail until cleared
    pub async fn inject_fault(&self, point: FaultPoint) {
        self.faults.lock().await.insert(point);
    }

    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// Number of stored (jobs, tasks)
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.jobs.len(), state.tasks.len())
    }

    async fn check_fault(&self, point: FaultPoint) -> Result<(), DatabaseError> {
        if self.faults.lock().await.contains(&point) {
            return Err(DatabaseError::TransactionFailed(format!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound(format!("job {}", id))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: NewJob) -> Result<Job, DatabaseError> {
        let mut state = self.state.lock().await;

        if state
            .jobs
            .values()
            .any(|j| j.owner_id == job.owner_id && j.name == job.name)
        {
            return Err(DatabaseError::DuplicateKey(format!(
                "job '{}' already exists for owner",
                job.name
            )));
        }

        let now = Utc::now();
        let created = Job {
            id: Uuid::new_v4(),
            owner_id: job.owner_id,
            name: job.name,
            connector: job.connector,
            credential: job.credential,
            destination_token: None,
            schedule: None,
            active: false,
            status: JobStatus::info("Job created"),
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, DatabaseError> {
        let state = self.state.lock().await;
        state.jobs.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn get_owned_job(&self, owner_id: &str, id: Uuid) -> Result<Job, DatabaseError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&id)
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn list_jobs(&self, owner_id: &str) -> Result<Vec<Job>, DatabaseError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(mask_jobs(jobs))
    }

    async fn list_active_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state.jobs.values().filter(|j| j.active).cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn update_job(&self, id: Uuid, patch: &JobPatch) -> Result<Job, DatabaseError> {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        patch.apply_to(job);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        state.jobs.remove(&id).ok_or_else(|| not_found(id))?;
        state.tasks.retain(|_, task| task.job_id != id);
        Ok(())
    }

    async fn record_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&task.job_id) {
            return Err(DatabaseError::ForeignKeyViolation(format!(
                "job {} does not exist",
                task.job_id
            )));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_tasks(&self, job_id: Uuid, page: Page) -> Result<Vec<Task>, DatabaseError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(a.id.cmp(&b.id)));

        Ok(tasks
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn last_task(&self, job_id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .max_by_key(|t| t.started_at)
            .cloned())
    }

    /// Works on a staged copy that replaces the live state only when every
    /// step succeeded
    async fn purge_by_identity(&self, name: &str) -> Result<PurgeReport, DatabaseError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        let job_ids: HashSet<Uuid> = staged
            .jobs
            .values()
            .filter(|job| job.name == name)
            .map(|job| job.id)
            .collect();

        let mut deleted_task_ids: Vec<Uuid> = staged
            .tasks
            .values()
            .filter(|t| job_ids.contains(&t.job_id))
            .map(|t| t.id)
            .collect();
        staged.tasks.retain(|_, t| !job_ids.contains(&t.job_id));
        self.check_fault(FaultPoint::PurgeTasks).await?;

        let mut deleted_job_ids: Vec<Uuid> = job_ids.into_iter().collect();
        staged.jobs.retain(|id, _| !deleted_job_ids.contains(id));
        self.check_fault(FaultPoint::PurgeJobs).await?;

        *state = staged;

        deleted_job_ids.sort();
        deleted_task_ids.sort();
        Ok(PurgeReport {
            deleted_job_ids,
            deleted_task_ids,
        })
    }
}
