use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::credential::serialize_masked_option;

// ============================================================================
// Connector Models
// ============================================================================

/// External source a job backs up from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorType {
    #[serde(rename = "mail-gmail")]
    MailGmail,
    #[serde(rename = "mail-outlook")]
    MailOutlook,
    #[serde(rename = "db-postgres")]
    DbPostgres,
    #[serde(rename = "db-mysql")]
    DbMysql,
}

/// Capability family a connector type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFamily {
    Mail,
    Database,
}

impl ConnectorType {
    pub const ALL: [ConnectorType; 4] = [
        ConnectorType::MailGmail,
        ConnectorType::MailOutlook,
        ConnectorType::DbPostgres,
        ConnectorType::DbMysql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::MailGmail => "mail-gmail",
            ConnectorType::MailOutlook => "mail-outlook",
            ConnectorType::DbPostgres => "db-postgres",
            ConnectorType::DbMysql => "db-mysql",
        }
    }

    pub fn family(&self) -> SourceFamily {
        match self {
            ConnectorType::MailGmail | ConnectorType::MailOutlook => SourceFamily::Mail,
            ConnectorType::DbPostgres | ConnectorType::DbMysql => SourceFamily::Database,
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectorType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown connector type: {}", s))
    }
}

/// Credential for a mail provider account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailCredential {
    pub refresh_token: String,
}

/// Connection settings for a database source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseCredential {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database_name: String,
}

/// Typed credential. Only the persistence boundary sees the untyped
/// `input_data` bag; see `crate::credential`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Mail(MailCredential),
    Database(DatabaseCredential),
}

// ============================================================================
// Schedule Models
// ============================================================================

/// How often a job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub const ALL: [Interval; 3] = [Interval::Daily, Interval::Weekly, Interval::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated `(interval, on)` pair. Construct with `Schedule::new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub(crate) interval: Interval,
    pub(crate) on: String,
}

impl Schedule {
    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn on(&self) -> &str {
        &self.on
    }
}

// ============================================================================
// Job Models
// ============================================================================

/// Severity of the user-visible job status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// User-visible job status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub message: String,
    pub severity: Severity,
}

impl JobStatus {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// Recurring backup definition
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub connector: ConnectorType,
    #[serde(rename = "input_data")]
    pub credential: Credential,
    #[serde(serialize_with = "serialize_masked_option")]
    pub destination_token: Option<String>,
    pub schedule: Option<Schedule>,
    pub active: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Blob store namespace this job writes into
    pub fn namespace(&self) -> String {
        self.id.to_string()
    }
}

/// Fields required to create a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: String,
    pub name: String,
    pub connector: ConnectorType,
    pub credential: Credential,
}

/// Partial job update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub schedule: Option<Schedule>,
    pub credential: Option<Credential>,
    pub destination_token: Option<String>,
    pub active: Option<bool>,
    pub status: Option<JobStatus>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_none()
            && self.credential.is_none()
            && self.destination_token.is_none()
            && self.active.is_none()
            && self.status.is_none()
    }

    /// Apply the supplied fields to `job`
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(schedule) = &self.schedule {
            job.schedule = Some(schedule.clone());
        }
        if let Some(credential) = &self.credential {
            job.credential = credential.clone();
        }
        if let Some(token) = &self.destination_token {
            job.destination_token = Some(token.clone());
        }
        if let Some(active) = self.active {
            job.active = active;
        }
        if let Some(status) = &self.status {
            job.status = status.clone();
        }
    }
}

// ============================================================================
// Task Models
// ============================================================================

/// Result of one job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Partial,
    Failure,
}

impl TaskOutcome {
    /// Outcome of a run that got past setup
    pub fn from_counts(processed: usize, failed: usize, skipped: usize) -> Self {
        if failed == 0 && skipped == 0 {
            TaskOutcome::Success
        } else if processed == 0 {
            TaskOutcome::Failure
        } else {
            TaskOutcome::Partial
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Success => write!(f, "success"),
            TaskOutcome::Partial => write!(f, "partial"),
            TaskOutcome::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for TaskOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(TaskOutcome::Success),
            "partial" => Ok(TaskOutcome::Partial),
            "failure" => Ok(TaskOutcome::Failure),
            _ => Err(format!("Unknown task outcome: {}", s)),
        }
    }
}

/// Diagnostic detail kept with each task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDetail {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Immutable execution record of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: TaskOutcome,
    pub detail: TaskDetail,
    pub created_at: DateTime<Utc>,
}

/// Normalized pagination window for task listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 1000;

    /// Clamp caller-supplied values: limit into (0, 1000] with 10 as the
    /// fallback for non-positive values, offset to >= 0.
    pub fn normalize(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > Self::MAX_LIMIT => Self::MAX_LIMIT,
            Some(l) if l > 0 => l,
            _ => Self::DEFAULT_LIMIT,
        };
        let offset = offset.unwrap_or(0).max(0);
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::normalize(None, None)
    }
}

/// Ids removed by an identity purge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted_job_ids: Vec<Uuid>,
    pub deleted_task_ids: Vec<Uuid>,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_job_ids.is_empty() && self.deleted_task_ids.is_empty()
    }
}
