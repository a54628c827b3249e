// Bootstrap utilities for binary initialization
// Shared wiring for the api and scheduler binaries

use crate::config::{BlobBackend, LockBackend, Settings};
use crate::connector::ConnectorRegistry;
use crate::db::{DbPool, JobStore, PgJobStore};
use crate::executor::JobExecutor;
use crate::lock::{JobLock, LocalJobLock, RedLock};
use crate::storage::{DestinationProvider, MemoryDestinations, MinioDestinations};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Initialize database pool, applying migrations when enabled
/// Used by: API server, Scheduler
///
/// # Errors
/// Returns error if the pool cannot connect or a migration fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    if settings.database.run_migrations {
        db_pool
            .migrate()
            .await
            .context("Failed to run database migrations")?;
    }

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Postgres-backed job store over an initialized pool
pub fn init_job_store(db_pool: DbPool) -> Arc<dyn JobStore> {
    Arc::new(PgJobStore::new(db_pool))
}

/// Initialize the run lock selected by `scheduler.lock_backend`
/// Used by: Scheduler
///
/// # Errors
/// Returns error if the Redis backend is selected and unreachable
#[tracing::instrument(skip(settings))]
pub async fn init_job_lock(settings: &Settings) -> Result<Arc<dyn JobLock>> {
    match settings.scheduler.lock_backend {
        LockBackend::Local => {
            info!("Using in-process run lock");
            Ok(Arc::new(LocalJobLock::new()))
        }
        LockBackend::Redis => {
            let lock = RedLock::connect(
                &settings.redis,
                Duration::from_secs(settings.scheduler.lock_ttl_seconds),
            )
            .await
            .context("Failed to connect run lock to Redis")?;
            lock.health_check().await.context("Redis health check failed")?;
            Ok(Arc::new(lock))
        }
    }
}

/// Destination provider selected by `blob_store.backend`
pub fn init_destinations(settings: &Settings) -> Arc<dyn DestinationProvider> {
    match settings.blob_store.backend {
        BlobBackend::S3 => Arc::new(MinioDestinations::new(settings.blob_store.clone())),
        BlobBackend::Memory => {
            warn!("Using in-memory blob store; backups will not survive a restart");
            Arc::new(MemoryDestinations::default())
        }
    }
}

/// Connector registry with the built-in database sources
pub fn init_connectors(settings: &Settings) -> Arc<ConnectorRegistry> {
    Arc::new(ConnectorRegistry::with_database_sources(
        settings.executor.page_size,
        Duration::from_secs(settings.database.connect_timeout_seconds),
    ))
}

pub fn init_executor(
    settings: &Settings,
    store: Arc<dyn JobStore>,
    connectors: Arc<ConnectorRegistry>,
    destinations: Arc<dyn DestinationProvider>,
) -> Arc<JobExecutor> {
    Arc::new(JobExecutor::new(
        store,
        connectors,
        destinations,
        settings.executor.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectorType;

    #[tokio::test]
    async fn test_local_lock_backend() {
        let settings = Settings::default();
        assert!(init_job_lock(&settings).await.is_ok());
    }

    #[test]
    fn test_connectors_include_database_sources() {
        let registry = init_connectors(&Settings::default());
        assert!(registry.supports(ConnectorType::DbPostgres));
        assert!(registry.supports(ConnectorType::DbMysql));
        assert!(!registry.supports(ConnectorType::MailGmail));
    }

    #[tokio::test]
    async fn test_memory_destinations() {
        let mut settings = Settings::default();
        settings.blob_store.backend = BlobBackend::Memory;
        let destinations = init_destinations(&settings);
        assert!(destinations.open("any-token").await.is_ok());
    }
}
