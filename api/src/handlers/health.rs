use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::state::AppState;

/// Health check endpoint
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(db_pool) = &state.db_pool {
        if let Err(e) = db_pool.health_check().await {
            tracing::warn!(error = %e, "Health check failed");
            return (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE");
        }
    }
    (StatusCode::OK, "OK")
}
