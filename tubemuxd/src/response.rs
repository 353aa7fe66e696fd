use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tubemux_core::SignerError;

pub const ERR_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const ERR_VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const ERR_INVALID_URL: &str = "INVALID_URL";
pub const ERR_INVALID_JOB_ID: &str = "INVALID_JOB_ID";
pub const ERR_INVALID_FILENAME: &str = "INVALID_FILENAME";
pub const ERR_INVALID_EXPIRES: &str = "INVALID_EXPIRES";
pub const ERR_JOB_NOT_READY: &str = "JOB_NOT_READY";
pub const ERR_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const ERR_FORBIDDEN: &str = "FORBIDDEN";
pub const ERR_JOB_NOT_FOUND: &str = "JOB_NOT_FOUND";
pub const ERR_VIDEO_NOT_FOUND: &str = "VIDEO_NOT_FOUND";
pub const ERR_AUDIO_NOT_FOUND: &str = "AUDIO_NOT_FOUND";
pub const ERR_FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
pub const ERR_INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const ERR_EXTRACT_FAILED: &str = "EXTRACT_FAILED";

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

/// The fixed error envelope: `{"error":{"code":"…","message":"…"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ERR_UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, ERR_FORBIDDEN, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ERR_INTERNAL_ERROR, message)
    }

    /// Maps a signed-URL rejection to its HTTP shape: missing credentials
    /// are 401, a malformed expiry 400, everything else 403.
    pub fn from_signer(err: SignerError) -> Self {
        match err {
            SignerError::MissingCredentials => {
                Self::unauthorized("Missing token or expires parameter")
            }
            SignerError::MalformedExpires => {
                Self::bad_request(ERR_INVALID_EXPIRES, "Invalid expires parameter")
            }
            SignerError::InvalidOrExpired => Self::forbidden("Invalid or expired token"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
