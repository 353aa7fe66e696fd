use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::warn;
use tubemux_core::{extract_source_id, validate_request, DownloadRequest, JobError};

use crate::response::{
    ApiError, ERR_AUDIO_NOT_FOUND, ERR_EXTRACT_FAILED, ERR_INVALID_REQUEST, ERR_INVALID_URL,
    ERR_VALIDATION_ERROR, ERR_VIDEO_NOT_FOUND,
};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub status_url: String,
    pub title: String,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_quality: Option<String>,
    pub quality_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_change_reason: Option<String>,
    pub needs_reencode: bool,
}

/// POST /api/download: validate, resolve the catalog, accept the job, and
/// hand back the signed status URL.
pub async fn download(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let Json(request) = body
        .map_err(|_| ApiError::bad_request(ERR_INVALID_REQUEST, "Invalid request body"))?;

    validate_request(&request)
        .map_err(|err| ApiError::bad_request(ERR_VALIDATION_ERROR, err.to_string()))?;
    let source_id = extract_source_id(&request.url)
        .map_err(|err| ApiError::bad_request(ERR_INVALID_URL, err.to_string()))?;

    let outcome = state
        .runner
        .submit(&source_id, &request)
        .await
        .map_err(|err| match err {
            JobError::VideoNotFound => {
                ApiError::not_found(ERR_VIDEO_NOT_FOUND, "No compatible video stream found")
            }
            JobError::AudioNotFound => {
                ApiError::not_found(ERR_AUDIO_NOT_FOUND, "No compatible audio stream found")
            }
            JobError::Extract(err) => {
                warn!(source = %source_id, error = %err, "metadata extraction failed");
                ApiError::new(
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    ERR_EXTRACT_FAILED,
                    "Failed to fetch video metadata",
                )
            }
            JobError::Store(err) => {
                warn!(source = %source_id, error = %err, "job creation failed");
                ApiError::internal("Failed to create job")
            }
        })?;

    Ok(Json(DownloadResponse {
        status_url: outcome.status_url,
        title: outcome.title,
        duration: outcome.duration,
        requested_quality: outcome.requested_quality,
        selected_quality: outcome.selected_quality,
        quality_changed: outcome.quality_changed,
        quality_change_reason: outcome.quality_change_reason,
        needs_reencode: outcome.needs_reencode,
    }))
}
