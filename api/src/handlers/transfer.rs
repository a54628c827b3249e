use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::handlers::{parse_job_id, ErrorResponse, SuccessResponse};
use crate::middleware::OwnerId;
use crate::state::AppState;
use common::service::KeySyncStatus;

#[derive(Debug, Deserialize)]
pub struct KeysRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailedKey {
    pub key: String,
    pub error: String,
}

/// Outcome of a bulk transfer. Partial failure is still a 200.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub processed: Vec<String>,
    pub failed: Vec<FailedKey>,
    pub skipped: Vec<String>,
    pub processed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
}

/// Which of the given source keys already exist at the job's destination
#[tracing::instrument(skip(state, payload))]
pub async fn sync_status(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(job_id): Path<String>,
    payload: Result<Json<KeysRequest>, JsonRejection>,
) -> Result<SuccessResponse<Vec<KeySyncStatus>>, ErrorResponse> {
    let job_id = parse_job_id(&job_id)?;
    let Json(request) = payload?;

    let statuses = state.service.sync_status(&owner_id, job_id, request.keys).await?;
    Ok(SuccessResponse::new(statuses))
}

/// Copy the given source keys to the job's destination now
#[tracing::instrument(skip(state, payload))]
pub async fn transfer(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(job_id): Path<String>,
    payload: Result<Json<KeysRequest>, JsonRejection>,
) -> Result<SuccessResponse<TransferResponse>, ErrorResponse> {
    let job_id = parse_job_id(&job_id)?;
    let Json(request) = payload?;

    let report = state.service.transfer(&owner_id, job_id, request.keys).await?;

    Ok(SuccessResponse::new(TransferResponse {
        processed_count: report.processed.len(),
        failed_count: report.failed.len(),
        skipped_count: report.skipped.len(),
        processed: report.processed,
        failed: report
            .failed
            .into_iter()
            .map(|(key, error)| FailedKey { key, error })
            .collect(),
        skipped: report.skipped,
    }))
}
