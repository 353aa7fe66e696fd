use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;
use tracing::warn;
use tubemux_core::{
    estimate_progress, valid_job_id, JobStatus, ProgressDetail, StoreError, TokenQuery,
};

use crate::response::{ApiError, ERR_INVALID_JOB_ID, ERR_JOB_NOT_FOUND};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ProgressDetail>,
}

/// GET /api/status/:id: the single source of truth for async job outcomes.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(token): Query<TokenQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    if !valid_job_id(&job_id) {
        return Err(ApiError::bad_request(
            ERR_INVALID_JOB_ID,
            "Invalid job ID format",
        ));
    }
    state
        .signer
        .authorize_status(&job_id, &token)
        .map_err(ApiError::from_signer)?;

    let meta = match state.store.read(&job_id).await {
        Ok(meta) => meta,
        Err(StoreError::NotFound { .. }) => {
            return Err(ApiError::not_found(ERR_JOB_NOT_FOUND, "Job not found"))
        }
        Err(err) => {
            warn!(job = %job_id, error = %err, "failed to read job metadata");
            return Err(ApiError::internal("Failed to read job metadata"));
        }
    };

    let (progress, detail) = estimate_progress(&meta, &state.store.dir(&job_id));

    let download_url = match meta.status {
        JobStatus::Completed => match (&meta.output, meta.stream_only) {
            (Some(output), false) => Some(state.signer.file_url(&job_id, output)),
            (_, true) => Some(state.signer.stream_url(&job_id)),
            _ => None,
        },
        _ => None,
    };

    Ok(Json(StatusResponse {
        status: meta.status.as_str(),
        progress,
        title: Some(meta.title.clone()).filter(|t| !t.is_empty()),
        duration: Some(meta.duration).filter(|d| *d > 0.0),
        download_url,
        job_error: meta.error.clone(),
        detail,
    }))
}
