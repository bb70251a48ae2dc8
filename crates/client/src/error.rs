//! Client error types.

use thiserror::Error;

/// Errors surfaced by the client resolver.
///
/// Individual peer-cache failures are never surfaced here; they are reported
/// to the selector and the next peer is tried. Only origin-side problems
/// reach the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
