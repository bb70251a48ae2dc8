//! DCDN cache proxy.
//!
//! This crate provides the peer-cache side of the protocol:
//! - The single-flight digest index over local cache files
//! - The `/cache` download-and-serve endpoint
//! - The `/checkcdn` health endpoint
//! - The `dcdn-proxyd` binary

pub mod error;
pub mod handlers;
pub mod index;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use index::CacheIndex;
pub use routes::create_router;
pub use state::ProxyState;
