use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio_util::io::ReaderStream;
use tracing::warn;
use tubemux_core::{
    naming, valid_filename, valid_job_id, JobStatus, StoreError, TokenQuery,
};

use crate::response::{
    ApiError, ERR_FILE_NOT_FOUND, ERR_INVALID_FILENAME, ERR_INVALID_JOB_ID, ERR_JOB_NOT_FOUND,
    ERR_JOB_NOT_READY,
};
use crate::state::AppState;

/// `attachment` disposition with an RFC 5987 encoded fallback for non-ASCII
/// titles. The quoted form is ASCII-sanitized so the header value stays
/// well-formed.
pub fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && !c.is_ascii_control() { c } else { '_' })
        .collect();
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /files/:id/:filename: serves a finalized artifact from the job
/// directory.
pub async fn files(
    State(state): State<Arc<AppState>>,
    Path((job_id, filename)): Path<(String, String)>,
    Query(token): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    if !valid_job_id(&job_id) {
        return Err(ApiError::bad_request(
            ERR_INVALID_JOB_ID,
            "Invalid job ID format",
        ));
    }
    if !valid_filename(&filename) {
        return Err(ApiError::bad_request(ERR_INVALID_FILENAME, "Invalid filename"));
    }
    state
        .signer
        .authorize_file(&job_id, &filename, &token)
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
            "Job is not completed yet",
        ));
    }

    let file_path = state.store.dir(&job_id).join(&filename);
    let file = match tokio::fs::File::open(&file_path).await {
        Ok(file) => file,
        Err(_) => return Err(ApiError::not_found(ERR_FILE_NOT_FOUND, "File not found")),
    };
    let size = file
        .metadata()
        .await
        .map_err(|err| {
            warn!(path = %file_path.display(), error = %err, "failed to stat artifact");
            ApiError::internal("Failed to read file")
        })?
        .len();

    let ext = filename.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(naming::content_type_for_ext(ext)),
    );
    if let Ok(value) = HeaderValue::from_str(&size.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&naming::output_filename(&meta)),
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}
