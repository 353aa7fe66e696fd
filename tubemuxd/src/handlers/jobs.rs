use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::warn;
use tubemux_core::valid_job_id;

use crate::response::{ApiError, ERR_INVALID_JOB_ID, ERR_JOB_NOT_FOUND};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// DELETE /api/jobs/:id: removes the job directory and everything in it.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if !valid_job_id(&job_id) {
        return Err(ApiError::bad_request(
            ERR_INVALID_JOB_ID,
            "Invalid job ID format",
        ));
    }
    if !state.store.exists(&job_id).await {
        return Err(ApiError::not_found(ERR_JOB_NOT_FOUND, "Job not found"));
    }
    if let Err(err) = state.store.delete(&job_id).await {
        warn!(job = %job_id, error = %err, "failed to delete job");
        return Err(ApiError::internal("Failed to delete job"));
    }
    Ok(Json(DeleteResponse { deleted: true }))
}
