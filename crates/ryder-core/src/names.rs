// ── Name resolution cache ──
//
// Read-through cache in front of the Blockstack core address lookup.
// Only non-empty successful lookups are stored; staleness is checked
// lazily on read.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::CoreError;

const USER_AGENT: &str = concat!("ryder-bridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
struct CacheEntry {
    names: Vec<String>,
    fetched_at: Instant,
}

#[derive(Debug, Deserialize)]
struct NamesResponse {
    #[serde(default)]
    names: Vec<String>,
}

/// Build the HTTP client used for name lookups.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| CoreError::NameLookup {
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Per-worker cache of address → registered names.
pub struct NameCache {
    http: reqwest::Client,
    api_url: Url,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl NameCache {
    pub fn new(http: reqwest::Client, api_url: Url, ttl: Duration) -> Self {
        Self {
            http,
            api_url,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Names registered to `address`, or `None` when the lookup failed or
    /// found nothing. Failures are not cached.
    pub async fn get_names(&self, address: &str) -> Option<Vec<String>> {
        if let Some(names) = self.cached(address) {
            return Some(names);
        }

        match self.lookup(address).await {
            Ok(names) if !names.is_empty() => {
                self.entries.insert(
                    address.to_owned(),
                    CacheEntry {
                        names: names.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(names)
            }
            Ok(_) => {
                debug!(%address, "no names registered");
                None
            }
            Err(e) => {
                warn!(%address, error = %e, "name lookup failed");
                None
            }
        }
    }

    /// Number of entries currently held, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cached(&self, address: &str) -> Option<Vec<String>> {
        let names = {
            let entry = self.entries.get(address)?;
            (entry.fetched_at.elapsed() < self.ttl).then(|| entry.names.clone())
        };
        if names.is_none() {
            self.entries.remove(address);
        }
        names
    }

    async fn lookup(&self, address: &str) -> Result<Vec<String>, CoreError> {
        let url = self.lookup_url(address)?;
        debug!(%url, "looking up names");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CoreError::NameLookup {
                message: e.to_string(),
            })?;
        let body: NamesResponse = resp.json().await.map_err(|e| CoreError::NameLookup {
            message: format!("unexpected response body: {e}"),
        })?;
        Ok(body.names)
    }

    fn lookup_url(&self, address: &str) -> Result<Url, CoreError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| CoreError::Config {
                message: format!("API URL {} cannot be used as a base", self.api_url),
            })?
            .pop_if_empty()
            .extend(["v1", "addresses", "bitcoin", address]);
        Ok(url)
    }
}
