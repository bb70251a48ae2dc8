//! Peer-cache selection.

use std::sync::{Mutex, PoisonError};
use url::Url;

/// Ranks candidate peer caches for a client.
///
/// `select_servers` returns a best-first snapshot the client walks for one
/// request; `report_failure` feeds back peers that were unreachable or not
/// speaking the protocol. Implementations must be safe to call concurrently,
/// including concurrently with `close`. The production ranking (geographic
/// proximity via a discovery service) lives outside this workspace.
pub trait ServerSelector: Send + Sync {
    /// Ordered list of peer cache base URLs to try.
    fn select_servers(&self) -> Vec<Url>;

    /// Note that a peer did not work for a request.
    fn report_failure(&self, peer: &Url);

    /// Release selector resources.
    fn close(&self) {}
}

/// Fixed peer list with failure-count demotion.
///
/// Keeps the configured order among peers with equal failure counts and
/// pushes repeatedly failing peers toward the end of the snapshot.
pub struct StaticSelector {
    peers: Mutex<Vec<RankedPeer>>,
}

struct RankedPeer {
    url: Url,
    failures: u32,
}

impl StaticSelector {
    pub fn new(peers: Vec<Url>) -> Self {
        Self {
            peers: Mutex::new(
                peers
                    .into_iter()
                    .map(|url| RankedPeer { url, failures: 0 })
                    .collect(),
            ),
        }
    }
}

impl ServerSelector for StaticSelector {
    fn select_servers(&self) -> Vec<Url> {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.sort_by_key(|p| p.failures);
        peers.iter().map(|p| p.url.clone()).collect()
    }

    fn report_failure(&self, peer: &Url) {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ranked) = peers.iter_mut().find(|p| &p.url == peer) {
            ranked.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn keeps_configured_order_without_failures() {
        let selector = StaticSelector::new(vec![url("http://a/"), url("http://b/")]);
        assert_eq!(
            selector.select_servers(),
            vec![url("http://a/"), url("http://b/")]
        );
    }

    #[test]
    fn demotes_failing_peer() {
        let a = url("http://a/");
        let b = url("http://b/");
        let selector = StaticSelector::new(vec![a.clone(), b.clone()]);
        selector.report_failure(&a);
        assert_eq!(selector.select_servers(), vec![b, a]);
    }

    #[test]
    fn unknown_peer_report_is_ignored() {
        let selector = StaticSelector::new(vec![url("http://a/")]);
        selector.report_failure(&url("http://elsewhere/"));
        assert_eq!(selector.select_servers(), vec![url("http://a/")]);
    }
}
