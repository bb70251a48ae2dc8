//! Error types for the core protocol.

use thiserror::Error;

/// Core protocol error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fingerprint syntax")]
    InvalidSyntax,

    #[error("unrecognized hash algorithm: {0}")]
    UnrecognizedAlgorithm(String),

    #[error("invalid hex digest: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid length field: {0}")]
    InvalidLength(String),

    #[error("input longer than declared length")]
    TooLong,

    #[error("input shorter than declared length")]
    TooShort,

    #[error("digest mismatch")]
    Mismatch,

    #[error("file exceeds maximum representable size")]
    OversizedFile,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the requested path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
