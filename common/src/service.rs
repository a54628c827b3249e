// Job service: creation, partial update and activation rules over the job store

use crate::auth::AdminSecret;
use crate::connector::ConnectorRegistry;
use crate::credential;
use crate::db::JobStore;
use crate::errors::{CredentialError, ServiceError};
use crate::executor::JobExecutor;
use crate::models::{
    ConnectorType, Credential, Interval, Job, JobPatch, JobStatus, NewJob, Page, PurgeReport,
    Schedule, SourceFamily, Task,
};
use crate::reconcile::reconcile;
use crate::schedule;
use crate::storage::DestinationProvider;
use crate::transfer::FanOutReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub input_data: Value,
    /// Display name for database jobs. Mail jobs are always named after the
    /// connected account.
    #[serde(default)]
    pub name: Option<String>,
}

/// Partial update. Omitted fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub on: Option<String>,
    #[serde(default)]
    pub input_data: Option<Value>,
    #[serde(default)]
    pub destination_token: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl UpdateJobRequest {
    fn is_empty(&self) -> bool {
        self.interval.is_none()
            && self.on.is_none()
            && self.input_data.is_none()
            && self.destination_token.is_none()
            && self.active.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySyncStatus {
    pub key: String,
    pub synced: bool,
}

/// Business rules shared by every job entry point
pub struct JobService {
    store: Arc<dyn JobStore>,
    connectors: Arc<ConnectorRegistry>,
    destinations: Arc<dyn DestinationProvider>,
    executor: Arc<JobExecutor>,
    admin_secret: AdminSecret,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        connectors: Arc<ConnectorRegistry>,
        destinations: Arc<dyn DestinationProvider>,
        executor: Arc<JobExecutor>,
        admin_secret: AdminSecret,
    ) -> Self {
        Self {
            store,
            connectors,
            destinations,
            executor,
            admin_secret,
        }
    }

    /// Valid `on` values per interval
    pub fn interval_table(&self) -> BTreeMap<Interval, Vec<String>> {
        schedule::interval_table()
    }

    /// Create an inactive job after a live credential check. Mail jobs are
    /// bound to the account identity the provider reports.
    #[instrument(skip(self, request), fields(owner_id = %owner_id, connector = %connector))]
    pub async fn create(
        &self,
        owner_id: &str,
        connector: ConnectorType,
        request: CreateJobRequest,
    ) -> Result<Job, ServiceError> {
        let credential = Credential::from_input(connector, &request.input_data)?;
        let identity = self.live_identity(connector, &credential).await?;

        let name = match (&credential, identity) {
            (_, Some(identity)) => identity,
            (Credential::Database(db), None) => request
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| db.display_name()),
            (Credential::Mail(_), None) => return Err(CredentialError::MissingIdentity.into()),
        };

        let job = self
            .store
            .create_job(NewJob {
                owner_id: owner_id.to_string(),
                name,
                connector,
                credential,
            })
            .await?;

        info!(job_id = %job.id, job_name = %job.name, "Job created");
        Ok(job)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Job, ServiceError> {
        Ok(self.store.get_owned_job(owner_id, id).await?)
    }

    #[instrument(skip(self))]
    pub async fn list(&self, owner_id: &str) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list_jobs(owner_id).await?)
    }

    /// Apply a partial update. Every check runs before the single store
    /// write, so a rejected update changes nothing.
    #[instrument(skip(self, request), fields(owner_id = %owner_id, job_id = %id))]
    pub async fn update(
        &self,
        owner_id: &str,
        id: Uuid,
        request: UpdateJobRequest,
    ) -> Result<Job, ServiceError> {
        let job = self.store.get_owned_job(owner_id, id).await?;

        if request.is_empty() {
            return Err(ServiceError::Validation("No fields to update".to_string()));
        }

        let mut patch = JobPatch::default();

        patch.schedule = match (&request.interval, &request.on) {
            (Some(interval), Some(on)) => Some(Schedule::parse(interval, on)?),
            (None, None) => None,
            _ => {
                return Err(ServiceError::Validation(
                    "interval and on must be supplied together".to_string(),
                ))
            }
        };

        if let Some(input) = &request.input_data {
            let credential = Credential::from_input(job.connector, input)?;
            let identity = self.live_identity(job.connector, &credential).await?;

            if job.connector.family() == SourceFamily::Mail {
                let identity = identity.ok_or(CredentialError::MissingIdentity)?;
                if identity != job.name {
                    warn!(
                        expected = %job.name,
                        actual = %identity,
                        "Credential bound to another account"
                    );
                    return Err(CredentialError::IdentityMismatch {
                        expected: job.name.clone(),
                        actual: identity,
                    }
                    .into());
                }
            }
            patch.credential = Some(credential);
        }

        if let Some(token) = &request.destination_token {
            let token = token.trim();
            if token.is_empty() {
                return Err(ServiceError::Validation(
                    "destination_token cannot be empty".to_string(),
                ));
            }
            patch.destination_token = Some(token.to_string());
        }

        match request.active {
            Some(true) => {
                self.check_activation(&job, &patch)?;
                patch.active = Some(true);
                patch.status = Some(JobStatus::info("Job activated"));
            }
            Some(false) => {
                patch.active = Some(false);
                patch.status = Some(JobStatus::info("Job paused"));
            }
            None => {}
        }

        let updated = self.store.update_job(job.id, &patch).await?;
        info!(active = updated.active, "Job updated");
        Ok(updated)
    }

    /// Activation needs a schedule, a credential that passes validation and
    /// a destination token, each either stored or in this update
    fn check_activation(&self, job: &Job, patch: &JobPatch) -> Result<(), ServiceError> {
        if patch.schedule.is_none() && job.schedule.is_none() {
            return Err(ServiceError::Validation(
                "interval and on are required when activating".to_string(),
            ));
        }

        if patch.credential.is_none() {
            credential::validate(job.connector, &job.credential)?;
        }

        let has_token = patch.destination_token.is_some()
            || job
                .destination_token
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty());
        if !has_token {
            return Err(ServiceError::Validation(
                "destination_token is required when activating".to_string(),
            ));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<(), ServiceError> {
        let job = self.store.get_owned_job(owner_id, id).await?;
        self.store.delete_job(job.id).await?;
        info!(job_id = %job.id, "Job deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn tasks(
        &self,
        owner_id: &str,
        job_id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Task>, ServiceError> {
        let job = self.store.get_owned_job(owner_id, job_id).await?;
        Ok(self
            .store
            .list_tasks(job.id, Page::normalize(limit, offset))
            .await?)
    }

    /// Per-key synced flags against the job's destination namespace
    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn sync_status(
        &self,
        owner_id: &str,
        job_id: Uuid,
        keys: Vec<String>,
    ) -> Result<Vec<KeySyncStatus>, ServiceError> {
        let job = self.store.get_owned_job(owner_id, job_id).await?;
        let token = job.destination_token.as_deref().ok_or_else(|| {
            ServiceError::Validation("destination_token is not configured".to_string())
        })?;

        let destination = self.destinations.open(token).await?;
        let flags = reconcile(destination.as_ref(), &job.namespace(), &keys).await?;

        Ok(keys
            .into_iter()
            .zip(flags)
            .map(|(key, synced)| KeySyncStatus { key, synced })
            .collect())
    }

    /// One-off bulk copy of the given source keys. Per-key failures are
    /// part of the report, not an error.
    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn transfer(
        &self,
        owner_id: &str,
        job_id: Uuid,
        keys: Vec<String>,
    ) -> Result<FanOutReport<String>, ServiceError> {
        if keys.is_empty() {
            return Err(ServiceError::Validation("keys cannot be empty".to_string()));
        }
        let job = self.store.get_owned_job(owner_id, job_id).await?;

        let report = self
            .executor
            .transfer_keys(&job, &keys, &CancellationToken::new())
            .await?;

        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            "Bulk transfer finished"
        );
        Ok(report)
    }

    /// Delete every job named `identity` with its tasks, guarded by the
    /// admin secret
    #[instrument(skip(self, secret))]
    pub async fn purge(&self, identity: &str, secret: &str) -> Result<PurgeReport, ServiceError> {
        self.admin_secret.verify(secret)?;

        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ServiceError::Validation("identity cannot be empty".to_string()));
        }

        let report = self.store.purge_by_identity(identity).await?;
        info!(
            jobs = report.deleted_job_ids.len(),
            tasks = report.deleted_task_ids.len(),
            "Identity purged"
        );
        Ok(report)
    }

    /// Connect with the credential, which is the live validation, and ask
    /// for the account identity
    async fn live_identity(
        &self,
        connector: ConnectorType,
        credential: &Credential,
    ) -> Result<Option<String>, ServiceError> {
        let source = self.connectors.connect(connector, credential).await?;
        Ok(source.account_identity().await?)
    }
}
