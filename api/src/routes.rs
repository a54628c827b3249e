use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no identity required). Purge carries its own secret.
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .route(
            "/auto-sync/admin/purge",
            post(handlers::admin::purge_identity),
        );

    // `:id` is the connector type on POST and the job id everywhere else
    let protected_routes = Router::new()
        .route("/auto-sync/job", get(handlers::jobs::list_jobs))
        .route("/auto-sync/job/", get(handlers::jobs::list_jobs))
        .route("/auto-sync/job/interval", get(handlers::jobs::list_intervals))
        .route(
            "/auto-sync/job/:id",
            get(handlers::jobs::get_job)
                .post(handlers::jobs::create_job)
                .put(handlers::jobs::update_job)
                .delete(handlers::jobs::delete_job),
        )
        .route(
            "/auto-sync/job/:id/sync-status",
            post(handlers::transfer::sync_status),
        )
        .route(
            "/auto-sync/job/:id/transfer",
            post(handlers::transfer::transfer),
        )
        .route("/auto-sync/task/:id", get(handlers::tasks::list_tasks))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
