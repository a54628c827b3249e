// Job executor: runs one job end to end and records the resulting task

use crate::config::ExecutorConfig;
use crate::connector::{ConnectorRegistry, SourceConnector, SourceItem};
use crate::credential;
use crate::db::JobStore;
use crate::errors::ExecutionError;
use crate::models::{Job, JobPatch, JobStatus, Task, TaskDetail, TaskOutcome};
use crate::reconcile::unsynced_items;
use crate::storage::DestinationProvider;
use crate::telemetry;
use crate::transfer::{FanOut, FanOutReport};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Counts of a run that got past setup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub listed: usize,
    pub already_synced: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunCounts {
    fn outcome(&self) -> TaskOutcome {
        TaskOutcome::from_counts(self.processed, self.failed, self.skipped)
    }

    fn status(&self, cancelled: bool) -> JobStatus {
        match self.outcome() {
            TaskOutcome::Success if self.processed == 0 => JobStatus::info(format!(
                "Up to date: {} items already backed up",
                self.already_synced
            )),
            TaskOutcome::Success => {
                JobStatus::info(format!("Backed up {} new items", self.processed))
            }
            TaskOutcome::Partial if cancelled => JobStatus::warning(format!(
                "Run stopped early: backed up {} items, {} failed, {} not started",
                self.processed, self.failed, self.skipped
            )),
            TaskOutcome::Partial => JobStatus::warning(format!(
                "Backed up {} items, {} failed",
                self.processed, self.failed
            )),
            TaskOutcome::Failure => JobStatus::error(format!(
                "Backup failed: {} items failed, {} not started",
                self.failed, self.skipped
            )),
        }
    }
}

/// Executes jobs against their source connector and destination store
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    connectors: Arc<ConnectorRegistry>,
    destinations: Arc<dyn DestinationProvider>,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        connectors: Arc<ConnectorRegistry>,
        destinations: Arc<dyn DestinationProvider>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            connectors,
            destinations,
            config,
        }
    }

    /// Run `job` once, then write its Task and status. Errors only when the
    /// Task or status could not be persisted; run failures become a
    /// `failure` Task.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, connector = %job.connector))]
    pub async fn execute(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Task, ExecutionError> {
        let started_at = Utc::now();
        let run_token = cancel.child_token();

        // Per-run timeout feeds the same token as shutdown
        let timeout = self.config.job_timeout();
        let timer = {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!(timeout_seconds = timeout.as_secs(), "Job run timed out, cancelling");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };

        let result = self.run(job, &run_token).await;
        let cancelled = run_token.is_cancelled();
        timer.abort();

        let (outcome, detail, status) = match result {
            Ok(counts) => {
                let detail = TaskDetail {
                    processed: counts.processed,
                    failed: counts.failed,
                    skipped: counts.skipped,
                    error: cancelled.then(|| "run cancelled before all items started".to_string()),
                };
                (counts.outcome(), detail, counts.status(cancelled))
            }
            Err(e) => {
                error!(error = %e, "Job run failed during setup");
                let detail = TaskDetail {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
                (
                    TaskOutcome::Failure,
                    detail,
                    JobStatus::error(format!("Backup failed: {}", e)),
                )
            }
        };

        let finished_at = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            job_id: job.id,
            started_at,
            finished_at,
            outcome,
            detail,
            created_at: finished_at,
        };

        self.store.record_task(&task).await?;
        self.store.update_job(job.id, &JobPatch::status(status)).await?;

        telemetry::record_task_outcome(outcome);
        telemetry::record_items(task.detail.processed, task.detail.failed);
        let duration = (finished_at - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        telemetry::record_job_duration(duration);

        info!(
            outcome = %outcome,
            processed = task.detail.processed,
            failed = task.detail.failed,
            skipped = task.detail.skipped,
            duration_seconds = duration,
            "Job run recorded"
        );

        Ok(task)
    }

    async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<RunCounts, ExecutionError> {
        let token = self.preflight(job)?;

        let connector = self.connectors.connect(job.connector, &job.credential).await?;
        let items = self.list_source(connector.as_ref(), cancel).await?;
        let listed = items.len();

        let namespace = job.namespace();
        let listing = self.destinations.open(token).await?;
        let pending = unsynced_items(listing.as_ref(), &namespace, items).await?;
        let already_synced = listed - pending.len();

        info!(listed, already_synced, pending = pending.len(), "Source reconciled");

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let report = self
            .copy_items(connector, token, namespace, pending, cancel)
            .await?;

        for (item, reason) in &report.failed {
            warn!(key = %item.key, error = %reason, "Item transfer failed");
        }

        Ok(RunCounts {
            listed,
            already_synced,
            processed: report.processed.len(),
            failed: report.failed.len(),
            skipped: report.skipped.len(),
        })
    }

    /// Copy the caller-selected source keys of `job`, synced or not. Keys
    /// the source does not list are reported as failed.
    #[instrument(skip(self, job, keys, cancel), fields(job_id = %job.id, requested = keys.len()))]
    pub async fn transfer_keys(
        &self,
        job: &Job,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> Result<FanOutReport<String>, ExecutionError> {
        let token = self.preflight(job)?;

        let connector = self.connectors.connect(job.connector, &job.credential).await?;
        let listed = self.list_source(connector.as_ref(), cancel).await?;

        let requested: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let found: Vec<SourceItem> = listed
            .into_iter()
            .filter(|item| requested.contains(item.key.as_str()))
            .collect();
        let found_keys: HashSet<&str> = found.iter().map(|item| item.key.as_str()).collect();

        let mut failed: Vec<(String, String)> = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if seen.insert(key.as_str()) && !found_keys.contains(key.as_str()) {
                failed.push((key.clone(), "item not found in source".to_string()));
            }
        }

        let report = self
            .copy_items(connector, token, job.namespace(), found, cancel)
            .await?;

        failed.extend(
            report
                .failed
                .into_iter()
                .map(|(item, reason)| (item.key, reason)),
        );

        Ok(FanOutReport {
            processed: report.processed.into_iter().map(|item| item.key).collect(),
            failed,
            skipped: report.skipped.into_iter().map(|item| item.key).collect(),
        })
    }

    /// Credential and destination token checks before anything is contacted
    fn preflight<'a>(&self, job: &'a Job) -> Result<&'a str, ExecutionError> {
        credential::validate(job.connector, &job.credential)?;
        job.destination_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ExecutionError::MissingDestination)
    }

    /// Fetch every page of the source listing, bounded by `max_pages`
    async fn list_source(
        &self,
        connector: &dyn SourceConnector,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceItem>, ExecutionError> {
        let mut items = Vec::new();
        let mut cursor = None;

        for page in 0..self.config.max_pages {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            let batch = connector.fetch_batch(cursor).await?;
            items.extend(batch.items);

            match batch.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }

            if page + 1 == self.config.max_pages {
                warn!(
                    max_pages = self.config.max_pages,
                    items = items.len(),
                    "Source listing truncated at page limit"
                );
            }
        }

        Ok(items)
    }

    /// Download each item and put it under `namespace`. The destination
    /// client is opened once for the batch; failing to open it fails the
    /// batch before any item starts.
    async fn copy_items(
        &self,
        connector: Arc<dyn SourceConnector>,
        token: &str,
        namespace: String,
        items: Vec<SourceItem>,
        cancel: &CancellationToken,
    ) -> Result<FanOutReport<SourceItem>, ExecutionError> {
        let namespace = Arc::new(namespace);

        let report = FanOut::new(self.config.concurrency)
            .run_with_setup(
                self.destinations.open(token),
                items,
                cancel,
                move |destination, item: SourceItem| {
                    let connector = Arc::clone(&connector);
                    let namespace = Arc::clone(&namespace);
                    async move {
                        let data = connector.download(&item).await.map_err(|e| e.to_string())?;
                        destination
                            .put(&namespace, &item.key, data)
                            .await
                            .map_err(|e| e.to_string())
                    }
                },
            )
            .await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorFactory, ItemBatch};
    use crate::db::MemoryJobStore;
    use crate::errors::ConnectorError;
    use crate::models::{ConnectorType, Credential, DatabaseCredential, NewJob};
    use crate::errors::{StorageError, TransferError};
    use crate::storage::{BlobStore, MemoryBlobStore, MemoryDestinations};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source listing fixed keys two per page
    struct FixtureSource {
        keys: Vec<String>,
    }

    #[async_trait]
    impl SourceConnector for FixtureSource {
        async fn fetch_batch(&self, cursor: Option<String>) -> Result<ItemBatch, ConnectorError> {
            let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let items: Vec<SourceItem> = self
                .keys
                .iter()
                .skip(offset)
                .take(2)
                .map(|key| SourceItem {
                    key: key.clone(),
                    locator: key.clone(),
                })
                .collect();
            let next = offset + items.len();
            Ok(ItemBatch {
                next_cursor: (next < self.keys.len()).then(|| next.to_string()),
                items,
            })
        }

        async fn download(&self, item: &SourceItem) -> Result<Vec<u8>, ConnectorError> {
            if item.key.contains("broken") {
                return Err(ConnectorError::ExportFailed(item.key.clone()));
            }
            Ok(item.key.as_bytes().to_vec())
        }
    }

    struct FixtureFactory {
        keys: Vec<String>,
    }

    #[async_trait]
    impl ConnectorFactory for FixtureFactory {
        async fn connect(
            &self,
            _credential: &Credential,
        ) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
            Ok(Arc::new(FixtureSource {
                keys: self.keys.clone(),
            }))
        }
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            concurrency: 2,
            job_timeout_seconds: 60,
            page_size: 2,
            max_pages: 100,
        }
    }

    fn db_credential() -> Credential {
        Credential::Database(DatabaseCredential {
            host: "db.internal".into(),
            port: "5432".into(),
            username: "backup".into(),
            password: "secret-password".into(),
            database_name: "orders".into(),
        })
    }

    async fn setup(keys: &[&str]) -> (Arc<MemoryJobStore>, Arc<MemoryBlobStore>, JobExecutor, Job) {
        let store = Arc::new(MemoryJobStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = ConnectorRegistry::new().register(
            ConnectorType::DbPostgres,
            Arc::new(FixtureFactory {
                keys: keys.iter().map(|k| k.to_string()).collect(),
            }),
        );
        let executor = JobExecutor::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(MemoryDestinations::new(blobs.clone())),
            config(),
        );

        let job = store
            .create_job(NewJob {
                owner_id: "owner-1".into(),
                name: "backup@db.internal:5432/orders".into(),
                connector: ConnectorType::DbPostgres,
                credential: db_credential(),
            })
            .await
            .unwrap();
        let job = store
            .update_job(
                job.id,
                &JobPatch {
                    destination_token: Some("AKIA:secret".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        (store, blobs, executor, job)
    }

    #[tokio::test]
    async fn test_copies_only_unsynced_items() {
        let (store, blobs, executor, job) = setup(&["a.csv", "b.csv", "c.csv"]).await;
        blobs.put(&job.namespace(), "b.csv", b"old".to_vec()).await.unwrap();

        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.outcome, TaskOutcome::Success);
        assert_eq!(task.detail.processed, 2);
        assert_eq!(blobs.keys(&job.namespace()).await, vec!["a.csv", "b.csv", "c.csv"]);
        // Already synced objects are left alone
        assert_eq!(blobs.get(&job.namespace(), "b.csv").await.unwrap(), b"old".to_vec());

        let last = store.last_task(job.id).await.unwrap().unwrap();
        assert_eq!(last.id, task.id);
    }

    #[tokio::test]
    async fn test_item_failures_make_partial() {
        let (store, _blobs, executor, job) = setup(&["a.csv", "broken.csv"]).await;

        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.outcome, TaskOutcome::Partial);
        assert_eq!((task.detail.processed, task.detail.failed), (1, 1));
        let job = store.get_job(job.id).await.unwrap();
        assert_eq!(job.status.severity, crate::models::Severity::Warning);
    }

    #[tokio::test]
    async fn test_every_item_failing_is_failure() {
        let (_store, _blobs, executor, job) = setup(&["broken-1.csv", "broken-2.csv"]).await;
        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();
        assert_eq!(task.outcome, TaskOutcome::Failure);
    }

    #[tokio::test]
    async fn test_missing_destination_token_records_failure() {
        let (store, _blobs, executor, mut job) = setup(&["a.csv"]).await;
        job.destination_token = None;

        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.outcome, TaskOutcome::Failure);
        assert!(task.detail.error.unwrap().contains("Destination token"));
        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.status.severity, crate::models::Severity::Error);
    }

    #[tokio::test]
    async fn test_invalid_credential_records_failure() {
        let (_store, _blobs, executor, mut job) = setup(&["a.csv"]).await;
        if let Credential::Database(db) = &mut job.credential {
            db.password.clear();
        }

        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.outcome, TaskOutcome::Failure);
        assert!(task.detail.error.unwrap().contains("password"));
    }

    #[tokio::test]
    async fn test_unreadable_destination_is_failure() {
        let (_store, blobs, executor, job) = setup(&["a.csv"]).await;
        blobs.fail_listing("access denied").await;

        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();
        assert_eq!(task.outcome, TaskOutcome::Failure);
        assert_eq!(task.detail.processed, 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_is_failure_without_transfers() {
        let (_store, blobs, executor, job) = setup(&["a.csv", "b.csv"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = executor.execute(&job, &cancel).await.unwrap();

        assert_eq!(task.outcome, TaskOutcome::Failure);
        assert!(blobs.keys(&job.namespace()).await.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_keys_reports_unknown_keys() {
        let (_store, blobs, executor, job) = setup(&["a.csv", "b.csv", "broken.csv"]).await;

        let keys = vec!["a.csv".to_string(), "broken.csv".to_string(), "zzz.csv".to_string()];
        let report = executor
            .transfer_keys(&job, &keys, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.processed, vec!["a.csv".to_string()]);
        let mut failed: Vec<&str> = report.failed.iter().map(|(k, _)| k.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["broken.csv", "zzz.csv"]);
        assert_eq!(blobs.keys(&job.namespace()).await, vec!["a.csv"]);
    }

    /// Opens the shared memory store a fixed number of times, then refuses
    struct RationedDestinations {
        inner: MemoryDestinations,
        opens_left: AtomicUsize,
    }

    #[async_trait]
    impl DestinationProvider for RationedDestinations {
        async fn open(&self, token: &str) -> Result<Arc<dyn BlobStore>, StorageError> {
            let granted = self
                .opens_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !granted {
                return Err(StorageError::InvalidToken("token revoked".to_string()));
            }
            self.inner.open(token).await
        }
    }

    fn rationed_executor(
        store: Arc<MemoryJobStore>,
        blobs: Arc<MemoryBlobStore>,
        keys: &[&str],
        opens: usize,
    ) -> JobExecutor {
        let registry = ConnectorRegistry::new().register(
            ConnectorType::DbPostgres,
            Arc::new(FixtureFactory {
                keys: keys.iter().map(|k| k.to_string()).collect(),
            }),
        );
        JobExecutor::new(
            store,
            Arc::new(registry),
            Arc::new(RationedDestinations {
                inner: MemoryDestinations::new(blobs),
                opens_left: AtomicUsize::new(opens),
            }),
            config(),
        )
    }

    #[tokio::test]
    async fn test_transfer_keys_fails_batch_when_destination_cannot_open() {
        let keys = ["a.csv", "b.csv"];
        let (store, blobs, _executor, job) = setup(&keys).await;
        let executor = rationed_executor(store, blobs.clone(), &keys, 0);

        let requested = vec!["a.csv".to_string(), "b.csv".to_string()];
        let err = executor
            .transfer_keys(&job, &requested, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ExecutionError::Transfer(TransferError::Setup(msg)) if msg.contains("token revoked")
        ));
        assert!(blobs.keys(&job.namespace()).await.is_empty());
    }

    #[tokio::test]
    async fn test_copy_client_setup_failure_records_failure() {
        let keys = ["a.csv", "b.csv"];
        let (store, blobs, _executor, job) = setup(&keys).await;
        // The listing handle opens, the copy client does not
        let executor = rationed_executor(store.clone(), blobs.clone(), &keys, 1);

        let task = executor.execute(&job, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.outcome, TaskOutcome::Failure);
        assert_eq!(task.detail.processed, 0);
        assert!(task.detail.error.unwrap().contains("Transfer setup failed"));
        assert!(blobs.keys(&job.namespace()).await.is_empty());
        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.status.severity, crate::models::Severity::Error);
    }
}
