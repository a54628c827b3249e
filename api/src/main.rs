use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use api::{create_router, AppState};
use common::auth::{AdminSecret, JwtIdentityResolver};
use common::bootstrap;
use common::config::Settings;
use common::service::JobService;
use common::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.tracing_endpoint.as_deref(),
    )?;
    let metrics_handle = telemetry::install_metrics_recorder()?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting API server"
    );

    let db_pool = bootstrap::init_database_pool(&config).await?;
    let store = bootstrap::init_job_store(db_pool.clone());
    let connectors = bootstrap::init_connectors(&config);
    let destinations = bootstrap::init_destinations(&config);
    let executor = bootstrap::init_executor(
        &config,
        store.clone(),
        connectors.clone(),
        destinations.clone(),
    );

    let service = Arc::new(JobService::new(
        store,
        connectors,
        destinations,
        executor,
        AdminSecret::new(&config.auth.admin_secret),
    ));
    let identity = Arc::new(JwtIdentityResolver::new(&config.auth.jwt_secret));

    let state = AppState::new(service, identity)
        .with_db_pool(db_pool.clone())
        .with_metrics(metrics_handle);

    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    telemetry::shutdown_tracer();
    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
