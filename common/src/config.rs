// Configuration management with layered configuration (file, env)

use crate::schedule::parse_timezone;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub blob_store: BlobStoreConfig,
    pub auth: AuthConfig,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    S3,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    pub backend: BlobBackend,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub admin_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    Local,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub lock_backend: LockBackend,
    pub lock_ttl_seconds: u64,
    pub max_jobs_per_poll: usize,
    pub timezone: String,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Parsed scheduler timezone. Checked by `Settings::validate`.
    pub fn tz(&self) -> Result<Tz, crate::errors::ScheduleError> {
        parse_timezone(&self.timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Fan-out ceiling for item transfers
    pub concurrency: usize,
    pub job_timeout_seconds: u64,
    pub page_size: usize,
    /// Upper bound on source pages fetched per run
    pub max_pages: usize,
}

impl ExecutorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.scheduler.lock_backend == LockBackend::Redis {
            if self.redis.url.is_empty() {
                return Err("Redis URL cannot be empty when lock_backend is 'redis'".to_string());
            }
            // A run must never outlive its lock between renewals
            if self.scheduler.lock_ttl_seconds <= self.executor.job_timeout_seconds {
                return Err(format!(
                    "Scheduler lock_ttl_seconds ({}) must exceed executor job_timeout_seconds ({}) \
                     when lock_backend is 'redis'",
                    self.scheduler.lock_ttl_seconds, self.executor.job_timeout_seconds
                ));
            }
        }

        if self.blob_store.backend == BlobBackend::S3 {
            if self.blob_store.endpoint.is_empty() {
                return Err("Blob store endpoint cannot be empty".to_string());
            }
            if self.blob_store.bucket.is_empty() {
                return Err("Blob store bucket cannot be empty".to_string());
            }
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret cannot be empty".to_string());
        }
        if self.auth.admin_secret.is_empty() {
            return Err("Admin secret cannot be empty".to_string());
        }

        if self.scheduler.poll_interval_seconds == 0 {
            return Err("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }
        if self.scheduler.lock_ttl_seconds == 0 {
            return Err("Scheduler lock_ttl_seconds must be greater than 0".to_string());
        }
        if self.scheduler.max_jobs_per_poll == 0 {
            return Err("Scheduler max_jobs_per_poll must be greater than 0".to_string());
        }
        self.scheduler.tz().map_err(|e| e.to_string())?;

        if self.executor.concurrency == 0 {
            return Err("Executor concurrency must be greater than 0".to_string());
        }
        if self.executor.job_timeout_seconds == 0 {
            return Err("Executor job_timeout_seconds must be greater than 0".to_string());
        }
        if self.executor.page_size == 0 || self.executor.max_pages == 0 {
            return Err("Executor page_size and max_pages must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/auto_sync".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
                run_migrations: true,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            blob_store: BlobStoreConfig {
                backend: BlobBackend::S3,
                endpoint: "http://localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "auto-sync".to_string(),
                region: "us-east-1".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                admin_secret: "change-me-admin".to_string(),
            },
            scheduler: SchedulerConfig {
                poll_interval_seconds: 30,
                lock_backend: LockBackend::Local,
                lock_ttl_seconds: 3600,
                max_jobs_per_poll: 100,
                timezone: "UTC".to_string(),
            },
            executor: ExecutorConfig {
                concurrency: 8,
                job_timeout_seconds: 1800,
                page_size: 100,
                max_pages: 1000,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_bad_timezone() {
        let mut settings = Settings::default();
        settings.scheduler.timezone = "Not/AZone".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_redis_lock_ttl_must_outlive_job_timeout() {
        let mut settings = Settings::default();
        settings.scheduler.lock_backend = LockBackend::Redis;
        settings.scheduler.lock_ttl_seconds = 10;
        settings.executor.job_timeout_seconds = 1800;
        assert!(settings.validate().is_err());

        settings.scheduler.lock_ttl_seconds = 1800;
        assert!(settings.validate().is_err());

        settings.scheduler.lock_ttl_seconds = 3600;
        assert!(settings.validate().is_ok());

        // The in-process lock has no expiry
        settings.scheduler.lock_backend = LockBackend::Local;
        settings.scheduler.lock_ttl_seconds = 10;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_zero_concurrency() {
        let mut settings = Settings::default();
        settings.executor.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_memory_backend_skips_endpoint_check() {
        let mut settings = Settings::default();
        settings.blob_store.backend = BlobBackend::Memory;
        settings.blob_store.endpoint = String::new();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = toml_from(&Settings::default());
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        file.write_all(defaults.as_bytes()).unwrap();

        let loaded = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(loaded.scheduler.timezone, "UTC");
        assert_eq!(loaded.executor.concurrency, 8);
        assert_eq!(loaded.blob_store.backend, BlobBackend::S3);
    }

    // Minimal TOML rendering of the settings used by the loader test
    fn toml_from(settings: &Settings) -> String {
        format!(
            r#"
[server]
host = "{host}"
port = {port}

[database]
url = "{db}"
max_connections = 10
min_connections = 2
connect_timeout_seconds = 30

[redis]
url = "redis://localhost:6379"

[blob_store]
backend = "s3"
endpoint = "http://localhost:9000"
access_key = "minioadmin"
secret_key = "minioadmin"
bucket = "auto-sync"
region = "us-east-1"

[auth]
jwt_secret = "secret"
admin_secret = "admin"

[scheduler]
poll_interval_seconds = 30
lock_backend = "local"
lock_ttl_seconds = 3600
max_jobs_per_poll = 100
timezone = "UTC"

[executor]
concurrency = 8
job_timeout_seconds = 1800
page_size = 100
max_pages = 1000

[observability]
log_level = "info"
metrics_port = 9090
"#,
            host = settings.server.host,
            port = settings.server.port,
            db = settings.database.url,
        )
    }
}
