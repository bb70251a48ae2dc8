//! HTTP error mapping for the origin server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Origin handler error.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("failed to load hash: {0}")]
    Internal(dcdn_core::Error),
}

impl From<dcdn_core::Error> for ApiError {
    fn from(e: dcdn_core::Error) -> Self {
        if e.is_not_found() {
            Self::NotFound
        } else {
            Self::Internal(e)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "404 not found").into_response(),
            Self::Internal(e) => {
                tracing::error!(error = %e, "failed to serve content");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load hash").into_response()
            }
        }
    }
}

/// Result type for origin handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
