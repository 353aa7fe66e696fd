use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tubemux_core::{valid_job_id, JobStatus, StoreError, TokenQuery};

use crate::handlers::files::content_disposition;
use crate::response::{ApiError, ERR_INVALID_JOB_ID, ERR_JOB_NOT_FOUND, ERR_JOB_NOT_READY};
use crate::state::AppState;

/// GET /stream/:id: remuxes the raw tracks through the media tool on demand
/// and pipes its stdout to the client. If a merged file already exists the
/// client is redirected to the plain file URL instead.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(token): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    if !valid_job_id(&job_id) {
        return Err(ApiError::bad_request(
            ERR_INVALID_JOB_ID,
            "Invalid job ID format",
        ));
    }
    state
        .signer
        .authorize_stream(&job_id, &token)
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
    if meta.status != JobStatus::Completed {
        return Err(ApiError::bad_request(
            ERR_JOB_NOT_READY,
            "Job is not ready for streaming",
        ));
    }

    if let (Some(output), false) = (&meta.output, meta.stream_only) {
        let url = state.signer.file_url(&job_id, output);
        return Ok(Redirect::temporary(&url).into_response());
    }

    let job = state
        .streamer
        .open(&meta, &state.store.dir(&job_id))
        .await
        .map_err(|err| {
            warn!(job = %job_id, error = %err, "failed to start stream");
            ApiError::internal("Failed to start stream")
        })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(job.content_type),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&job.filename),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    let body = Body::from_stream(ReceiverStream::new(job.receiver));
    Ok((StatusCode::OK, headers, body).into_response())
}
