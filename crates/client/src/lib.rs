//! DCDN client: origin fetches with opportunistic peer-cache redirection.
//!
//! The [`Client`] talks to the origin, discovers fingerprints from response
//! headers, and transparently redirects body downloads to nearby peer caches
//! supplied by a [`ServerSelector`]. Verification stays with the caller: the
//! client hands back the advertised fingerprint alongside whichever body
//! source won.

pub mod error;
pub mod resolver;
pub mod selector;

pub use error::ClientError;
pub use resolver::{Client, Fetched, Via};
pub use selector::{ServerSelector, StaticSelector};
