use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub identity: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted_job_ids: Vec<Uuid>,
    pub deleted_task_ids: Vec<Uuid>,
    pub deleted_jobs: usize,
    pub deleted_tasks: usize,
}

/// Delete every job bound to an external identity, with all their tasks
#[tracing::instrument(skip(state, payload))]
pub async fn purge_identity(
    State(state): State<AppState>,
    payload: Result<Json<PurgeRequest>, JsonRejection>,
) -> Result<SuccessResponse<PurgeResponse>, ErrorResponse> {
    let Json(request) = payload?;

    let report = state
        .service
        .purge(&request.identity, &request.secret)
        .await?;

    Ok(SuccessResponse::new(PurgeResponse {
        deleted_jobs: report.deleted_job_ids.len(),
        deleted_tasks: report.deleted_task_ids.len(),
        deleted_job_ids: report.deleted_job_ids,
        deleted_task_ids: report.deleted_task_ids,
    }))
}
