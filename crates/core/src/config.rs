//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Origin server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory whose contents are served.
    #[serde(default = "default_content_dir")]
    pub dir: PathBuf,
    /// Fingerprint algorithm for served files.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            dir: default_content_dir(),
            algorithm: default_algorithm(),
        }
    }
}

/// Cache proxy configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory holding downloaded cache files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Peer cache base URLs for the proxy's own client, ranked best-first.
    /// Empty means all downloads go straight to the origin.
    #[serde(default)]
    pub peers: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cache_dir: default_cache_dir(),
            peers: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_content_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_algorithm() -> String {
    "sha256".to_string()
}
