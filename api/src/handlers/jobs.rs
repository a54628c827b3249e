use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::handlers::{parse_job_id, ErrorResponse, SuccessResponse};
use crate::middleware::OwnerId;
use crate::state::AppState;
use common::errors::ServiceError;
use common::models::{ConnectorType, Interval, Job};
use common::service::{CreateJobRequest, UpdateJobRequest};

#[derive(Debug, Serialize)]
pub struct DeletedJob {
    pub id: Uuid,
}

/// List the caller's jobs, newest first
#[tracing::instrument(skip(state))]
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
) -> Result<SuccessResponse<Vec<Job>>, ErrorResponse> {
    let jobs = state.service.list(&owner_id).await?;
    Ok(SuccessResponse::new(jobs))
}

#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<SuccessResponse<Job>, ErrorResponse> {
    let id = parse_job_id(&id)?;
    let job = state.service.get(&owner_id, id).await?;
    Ok(SuccessResponse::new(job))
}

/// Create a job for the connector named in the path
#[tracing::instrument(skip(state, payload))]
pub async fn create_job(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(connector): Path<String>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<SuccessResponse<Job>, ErrorResponse> {
    let connector: ConnectorType = connector
        .parse()
        .map_err(|e: String| ErrorResponse::from(ServiceError::Validation(e)))?;
    let Json(request) = payload?;

    let job = state.service.create(&owner_id, connector, request).await?;
    tracing::info!(job_id = %job.id, "Job created successfully");
    Ok(SuccessResponse::new(job))
}

/// Partial update: interval+on, input_data, destination_token, active
#[tracing::instrument(skip(state, payload))]
pub async fn update_job(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateJobRequest>, JsonRejection>,
) -> Result<SuccessResponse<Job>, ErrorResponse> {
    let id = parse_job_id(&id)?;
    let Json(request) = payload?;

    let job = state.service.update(&owner_id, id, request).await?;
    Ok(SuccessResponse::new(job))
}

#[tracing::instrument(skip(state))]
pub async fn delete_job(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<SuccessResponse<DeletedJob>, ErrorResponse> {
    let id = parse_job_id(&id)?;
    state.service.delete(&owner_id, id).await?;
    Ok(SuccessResponse::new(DeletedJob { id }))
}

/// Valid `on` values for each interval
#[tracing::instrument(skip(state))]
pub async fn list_intervals(
    State(state): State<AppState>,
) -> SuccessResponse<BTreeMap<Interval, Vec<String>>> {
    SuccessResponse::new(state.service.interval_table())
}
