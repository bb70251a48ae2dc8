//! Core protocol types for the DCDN.
//!
//! This crate defines the fingerprint wire form and everything needed to
//! produce and check it:
//! - Fingerprint parsing and formatting (`name:hex:length`)
//! - The hash algorithm registry
//! - Streaming verification and generation
//! - Configuration types shared by the origin and proxy servers

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod registry;

pub use error::{Error, Result};
pub use fingerprint::{DigestWriter, Fingerprint, Verifier};
pub use registry::{HashRegistry, HasherFactory};

/// Header names of the DCDN wire protocol.
pub mod headers {
    /// Role marker: `server` on origin responses, `client` on client
    /// requests, `cache` on proxy responses.
    pub const DCDN: &str = "x-dcdn";
    /// Fingerprint of the response body in canonical text form.
    pub const DCDN_HASH: &str = "x-dcdn-hash";
}
