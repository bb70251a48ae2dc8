//! The client resolver: origin fetches with opportunistic peer redirection.

use crate::error::{ClientError, Result};
use crate::selector::ServerSelector;
use bytes::Bytes;
use dcdn_core::{Fingerprint, headers};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// A DCDN-aware HTTP client.
///
/// Requests go to the origin first. When the origin identifies itself as a
/// DCDN server and publishes a parseable fingerprint, the configured
/// selector's peer caches are tried in order; the first peer speaking the
/// protocol serves the body, and peers that do not are reported back to the
/// selector. Without a selector (or when every peer fails) the origin body
/// is used directly.
pub struct Client {
    inner: RwLock<Inner>,
}

struct Inner {
    selector: Option<Arc<dyn ServerSelector>>,
    http: reqwest::Client,
    closed: bool,
}

impl Client {
    /// Create a client with a default HTTP client and no selector.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                selector: None,
                http: reqwest::Client::new(),
                closed: false,
            }),
        }
    }

    /// Set the peer selector (default: none, every request uses the origin).
    ///
    /// # Panics
    ///
    /// Panics if the client has been closed.
    pub fn set_selector(&self, selector: Arc<dyn ServerSelector>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        assert!(!inner.closed, "selector set on a closed client");
        inner.selector = Some(selector);
    }

    /// Replace the underlying HTTP client.
    ///
    /// # Panics
    ///
    /// Panics if the client has been closed.
    pub fn set_http_client(&self, http: reqwest::Client) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        assert!(!inner.closed, "http client set on a closed client");
        inner.http = http;
    }

    /// Fetch a URL, redirecting through a peer cache when possible.
    pub async fn get(&self, url: Url) -> Result<Fetched> {
        let (selector, http) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if inner.closed {
                return Err(ClientError::Closed);
            }
            (inner.selector.clone(), inner.http.clone())
        };

        let origin = http
            .get(url.clone())
            .header(headers::DCDN, "client")
            .send()
            .await?;
        let origin_headers = origin.headers().clone();
        let raw_hash = origin_headers
            .get(headers::DCDN_HASH)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let from_dcdn_server = origin_headers
            .get(headers::DCDN)
            .is_some_and(|v| v.as_bytes() == b"server");

        if let (Some(selector), Some(raw)) = (&selector, &raw_hash)
            && from_dcdn_server
            && let Ok(fingerprint) = Fingerprint::parse(raw)
        {
            for peer in selector.select_servers() {
                let Ok(mut peer_url) = peer.join("/cache") else {
                    selector.report_failure(&peer);
                    continue;
                };
                peer_url
                    .query_pairs_mut()
                    .append_pair("hash", raw)
                    .append_pair("url", url.as_str());

                match http.get(peer_url).send().await {
                    Ok(resp)
                        if resp
                            .headers()
                            .get(headers::DCDN)
                            .is_some_and(|v| v.as_bytes() == b"cache") =>
                    {
                        tracing::debug!(peer = %peer, url = %url, "serving from peer cache");
                        // mirror the origin's header set so content-type
                        // and caching directives survive the redirection
                        return Ok(Fetched {
                            status: resp.status(),
                            headers: origin_headers,
                            fingerprint: Some(fingerprint.clone()),
                            via: Via::Peer(peer),
                            body: resp,
                        });
                    }
                    Ok(_) | Err(_) => {
                        tracing::debug!(peer = %peer, "peer cache unusable, reporting");
                        selector.report_failure(&peer);
                    }
                }
            }
        }

        let fingerprint = raw_hash
            .as_deref()
            .and_then(|raw| Fingerprint::parse(raw).ok());
        Ok(Fetched {
            status: origin.status(),
            headers: origin_headers,
            fingerprint,
            via: Via::Origin,
            body: origin,
        })
    }

    /// Close the client and its selector. Later `get` calls fail.
    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        if let Some(selector) = &inner.selector {
            selector.close();
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a [`Fetched`] body came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Via {
    Origin,
    Peer(Url),
}

/// A resolved response: the body may come from the origin or a peer cache,
/// the header set is always the origin's.
#[derive(Debug)]
pub struct Fetched {
    status: StatusCode,
    headers: HeaderMap,
    fingerprint: Option<Fingerprint>,
    via: Via,
    body: reqwest::Response,
}

impl Fetched {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The origin's header set.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The fingerprint advertised by the origin, if it parsed.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn via(&self) -> &Via {
        &self.via
    }

    /// Stream the next body chunk.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.body.chunk().await?)
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.body.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_client_rejects_requests() {
        let client = Client::new();
        client.close();
        let err = client
            .get(Url::parse("http://127.0.0.1:9/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[test]
    #[should_panic(expected = "closed client")]
    fn set_selector_after_close_panics() {
        let client = Client::new();
        client.close();
        client.set_selector(Arc::new(crate::selector::StaticSelector::new(Vec::new())));
    }
}
