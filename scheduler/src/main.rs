// Scheduler binary entry point

use anyhow::{Context, Result};
use common::bootstrap;
use common::config::Settings;
use common::scheduler::{Scheduler, SchedulerEngine};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        timezone = %settings.scheduler.timezone,
        lock_backend = ?settings.scheduler.lock_backend,
        poll_interval_seconds = settings.scheduler.poll_interval_seconds,
        "Starting auto-sync scheduler"
    );

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let store = bootstrap::init_job_store(db_pool.clone());
    let lock = bootstrap::init_job_lock(&settings).await?;
    let connectors = bootstrap::init_connectors(&settings);
    let destinations = bootstrap::init_destinations(&settings);
    let executor = bootstrap::init_executor(&settings, store.clone(), connectors, destinations);

    let scheduler = Arc::new(
        SchedulerEngine::new(settings.scheduler.clone(), store, executor, lock)
            .context("Failed to create scheduler engine")?,
    );
    info!("Scheduler engine created");

    let scheduler_for_shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, waiting for in-flight runs");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    if let Err(e) = scheduler.start().await {
        error!(error = %e, "Scheduler error");
        return Err(anyhow::anyhow!("Scheduler failed: {}", e));
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
