//! HTTP error types and their stable JSON bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Every error answers `{error, message}`; `error` is a stable slug for
/// client-side handling.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, slug, message) = match self {
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            HttpError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            HttpError::Internal(msg) => {
                tracing::error!(%msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };
        let body = ErrorBody {
            error: slug,
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<scrive_storage::StorageError> for HttpError {
    fn from(err: scrive_storage::StorageError) -> Self {
        match err {
            scrive_storage::StorageError::NotFound(what) => HttpError::NotFound(what),
            other => HttpError::Internal(other.to_string()),
        }
    }
}
