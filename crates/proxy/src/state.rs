//! Application state shared across handlers.

use crate::index::CacheIndex;
use dcdn_client::Client;
use dcdn_core::HashRegistry;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct ProxyState {
    /// Single-flight digest index.
    pub index: CacheIndex,
    /// Resolver used for origin downloads.
    pub client: Arc<Client>,
    /// Algorithm registry for fingerprint parsing and verification.
    pub registry: Arc<HashRegistry>,
}
