//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Bootstrap result type.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// A fatal configuration or startup error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BootstrapError {
    message: String,
}

impl BootstrapError {
    /// Creates a bootstrap error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The JSON error body returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Error detail text.
    pub data: String,
    /// Error category.
    pub msg: String,
}

/// An HTTP-mapped handler error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    data: String,
    msg: &'static str,
}

impl ApiError {
    /// A malformed or unprocessable request; never retried.
    #[must_use]
    pub fn bad_request(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            data: err.to_string(),
            msg: "request not match",
        }
    }

    /// Persisting the intent record failed.
    #[must_use]
    pub fn apply_failed(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            data: err.to_string(),
            msg: "apply the resource error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            data: self.data,
            msg: self.msg.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_maps_to_400() {
        let response = ApiError::bad_request("missing gitUrl").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn apply_failure_maps_to_500() {
        let response = ApiError::apply_failed("conflict exhausted").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
