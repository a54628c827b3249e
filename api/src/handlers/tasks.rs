use axum::{
    extract::{Path, Query, State},
    Extension,
};
use serde::Deserialize;

use crate::handlers::{parse_job_id, ErrorResponse, SuccessResponse};
use crate::middleware::OwnerId;
use crate::state::AppState;
use common::models::Task;

/// Query parameters for task listings. Out-of-range values are clamped.
#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Execution history of one job, newest first
#[tracing::instrument(skip(state))]
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(OwnerId(owner_id)): Extension<OwnerId>,
    Path(job_id): Path<String>,
    Query(query): Query<TaskQuery>,
) -> Result<SuccessResponse<Vec<Task>>, ErrorResponse> {
    let job_id = parse_job_id(&job_id)?;
    let tasks = state
        .service
        .tasks(&owner_id, job_id, query.limit, query.offset)
        .await?;
    Ok(SuccessResponse::new(tasks))
}
