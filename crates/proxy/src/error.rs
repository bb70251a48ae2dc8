//! HTTP error mapping for the cache proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Cache proxy handler error.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::BadRequest(m) | Self::BadGateway(m) | Self::Internal(m) => m.clone(),
        };
        (status, message).into_response()
    }
}

/// Result type for proxy handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
