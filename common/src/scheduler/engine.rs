// Scheduler engine: finds due jobs and dispatches each run under its run lock

use crate::config::SchedulerConfig;
use crate::db::JobStore;
use crate::errors::{DatabaseError, ScheduleError};
use crate::executor::JobExecutor;
use crate::lock::JobLock;
use crate::models::Job;
use crate::schedule::ScheduleTrigger;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

/// Scheduler trait for job scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the scheduler polling loop
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop the scheduler gracefully
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Process jobs that are due for execution
    async fn process_due_jobs(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    tz: Tz,
    store: Arc<dyn JobStore>,
    executor: Arc<JobExecutor>,
    lock: Arc<dyn JobLock>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    // Dispatch instants not yet visible as a Task start
    last_dispatch: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    running: Arc<AtomicUsize>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<JobExecutor>,
        lock: Arc<dyn JobLock>,
    ) -> Result<Self, ScheduleError> {
        let tz = config.tz()?;

        Ok(Self {
            config,
            tz,
            store,
            executor,
            lock,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            last_dispatch: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Token cancelled by `stop`; in-flight runs observe it too
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of runs currently in flight
    pub fn running_jobs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn tracked_dispatches(&self) -> usize {
        self.last_dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Wait until every dispatched run has finished
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Instant the job's due check is measured from: the later of its last
    /// Task start and its last dispatch, else its creation time
    async fn reference_instant(&self, job: &Job) -> Result<DateTime<Utc>, DatabaseError> {
        let last_started = self.store.last_task(job.id).await?.map(|task| task.started_at);
        let last_dispatched = {
            let mut dispatches = self
                .last_dispatch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let dispatched = dispatches.get(&job.id).copied();
            // Once a Task start covers the dispatch the entry adds nothing
            match (dispatched, last_started) {
                (Some(at), Some(started)) if started >= at => {
                    dispatches.remove(&job.id);
                    None
                }
                _ => dispatched,
            }
        };

        Ok(last_started
            .into_iter()
            .chain(last_dispatched)
            .max()
            .unwrap_or(job.created_at))
    }

    fn is_job_due(&self, job: &Job, reference: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(schedule) = &job.schedule else {
            warn!(job_id = %job.id, "Active job has no schedule, skipping");
            return false;
        };

        match schedule.is_due(reference, now, self.tz) {
            Ok(due) => due,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to compute fire time");
                false
            }
        }
    }

    /// Dispatch `job` unless a run of it is already in flight. Returns
    /// whether a run was started.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    async fn dispatch(&self, job: Job, now: DateTime<Utc>) -> bool {
        let guard = match self.lock.try_acquire(job.id).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!("Job already running, skipping");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to acquire run lock, skipping job");
                return false;
            }
        };

        self.last_dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job.id, now);

        let executor = Arc::clone(&self.executor);
        let running = Arc::clone(&self.running);
        let cancel = self.shutdown.child_token();

        telemetry::update_running_jobs(running.fetch_add(1, Ordering::SeqCst) + 1);
        info!("Job dispatched");

        self.tracker.spawn(
            async move {
                if let Err(e) = executor.execute(&job, &cancel).await {
                    error!(error = %e, "Failed to record job run");
                }
                // Release the run lock whether the run succeeded or not
                drop(guard);
                telemetry::update_running_jobs(running.fetch_sub(1, Ordering::SeqCst) - 1);
            }
            .in_current_span(),
        );

        true
    }

    /// Dispatch every active job due at `now`, up to `max_jobs_per_poll`
    #[instrument(skip(self))]
    pub async fn process_due_jobs_at(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let jobs = self.store.list_active_jobs().await.map_err(|e| {
            error!(error = %e, "Failed to query active jobs");
            e
        })?;

        debug!(job_count = jobs.len(), "Found active jobs to evaluate");

        // Forget dispatches of jobs that were paused or deleted
        {
            let active: HashSet<Uuid> = jobs.iter().map(|job| job.id).collect();
            self.last_dispatch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|id, _| active.contains(id));
        }

        let mut dispatched = 0;
        for job in jobs {
            if dispatched >= self.config.max_jobs_per_poll {
                debug!(
                    max_jobs_per_poll = self.config.max_jobs_per_poll,
                    "Dispatch cap reached for this poll"
                );
                break;
            }

            let reference = match self.reference_instant(&job).await {
                Ok(reference) => reference,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to load last task, skipping job");
                    continue;
                }
            };

            if !self.is_job_due(&job, reference, now) {
                continue;
            }

            if self.dispatch(job, now).await {
                dispatched += 1;
            }
        }

        Ok(dispatched)
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            timezone = %self.tz,
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_due_jobs().await {
                        Ok(count) if count > 0 => {
                            info!(jobs_dispatched = count, "Dispatched due jobs")
                        }
                        Ok(_) => debug!("No jobs due for execution"),
                        Err(e) => error!(error = %e, "Error processing due jobs"),
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        self.drain().await;
        info!("Scheduler engine stopped");
        Ok(())
    }

    /// Stop polling, cancel in-flight runs and wait for them to record
    /// their tasks
    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(running_jobs = self.running_jobs(), "Stopping scheduler engine");
        self.shutdown.cancel();
        self.drain().await;
        info!("Scheduler engine stopped gracefully");
        Ok(())
    }

    async fn process_due_jobs(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.process_due_jobs_at(Utc::now()).await?)
    }
}
