//! DCDN origin: content directory serving with fingerprint headers.
//!
//! This crate provides the origin side of the protocol:
//! - A lazily-computed fingerprint cache with mtime invalidation
//! - The file-serving HTTP handler that publishes fingerprints
//! - The `dcdn-origind` binary

pub mod error;
pub mod hashcache;
pub mod server;

pub use error::ApiError;
pub use hashcache::HashCache;
pub use server::{OriginState, create_router};
