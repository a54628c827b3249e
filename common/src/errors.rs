// Error handling framework
// One thiserror enum per area; ServiceError is the taxonomy surfaced to callers.

use crate::models::ConnectorType;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid interval '{0}': expected one of daily, weekly, monthly")]
    InvalidInterval(String),

    #[error("Invalid value '{on}' for {interval} schedule")]
    InvalidOn { interval: String, on: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Schedule calculation failed: {0}")]
    CalculationFailed(String),
}

/// Credential validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Missing required credential field: {0}")]
    MissingField(String),

    #[error("Invalid credential field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Credential belongs to '{actual}', expected '{expected}'")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Connector did not report an account identity")]
    MissingIdentity,

    #[error("Credential rejected by provider: {0}")]
    Rejected(String),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Blob store and lock backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid destination token: {0}")]
    InvalidToken(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Source connector errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("No connector registered for {0}")]
    Unsupported(ConnectorType),

    #[error("Credential does not match connector {0}")]
    CredentialMismatch(ConnectorType),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),
}

/// Bounded fan-out errors. Only setup failures surface here; per-item
/// failures are reported in the batch report.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer setup failed: {0}")]
    Setup(String),
}

/// Setup-level job execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Destination token is not configured")]
    MissingDestination,

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Execution cancelled before transfer started")]
    Cancelled,

    #[error("Failed to persist execution: {0}")]
    Persistence(#[from] DatabaseError),
}

/// Identity resolution errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing identity header")]
    MissingIdentity,

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid admin secret")]
    InvalidSecret,
}

/// Errors returned by the job service, one variant per caller-visible category
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("Job not found")]
    NotFound,

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl From<ScheduleError> for ServiceError {
    fn from(err: ScheduleError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(_) => ServiceError::NotFound,
            DatabaseError::DuplicateKey(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Persistence(other.to_string()),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        ServiceError::Unauthorized(err.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidToken(_) => ServiceError::Validation(err.to_string()),
            other => ServiceError::Persistence(other.to_string()),
        }
    }
}

impl From<ExecutionError> for ServiceError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Credential(e) => ServiceError::Credential(e),
            ExecutionError::Connector(e) => e.into(),
            ExecutionError::Storage(e) => e.into(),
            ExecutionError::Persistence(e) => e.into(),
            // Opening a destination client only parses the token
            ExecutionError::MissingDestination
            | ExecutionError::Cancelled
            | ExecutionError::Transfer(_) => ServiceError::Validation(err.to_string()),
        }
    }
}

impl From<ConnectorError> for ServiceError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Unsupported(_) | ConnectorError::CredentialMismatch(_) => {
                ServiceError::Validation(err.to_string())
            }
            other => ServiceError::Credential(CredentialError::Rejected(other.to_string())),
        }
    }
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => ApiError::new("validation_error", msg),
            ServiceError::NotFound => ApiError::new("not_found", "Job not found"),
            ServiceError::Credential(e) => ApiError::new("credential_error", e.to_string()),
            ServiceError::Conflict(_) => ApiError::new(
                "conflict",
                "A job for this account already exists",
            ),
            ServiceError::Unauthorized(msg) => ApiError::new("unauthorized", msg),
            // Persistence detail stays in the logs
            ServiceError::Persistence(_) => {
                ApiError::new("internal_error", "An internal error occurred")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new("unauthorized", err.to_string())
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::RedisError(err.to_string())
    }
}
