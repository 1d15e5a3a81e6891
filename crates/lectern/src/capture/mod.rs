//! # Network observation log
//!
//! The engine never drives a browser. Whatever produced the page traffic
//! (a live capture bridge, a recorded HAR file, a test fixture) is exposed
//! through [`NetworkLog`], which the playlist, rendition and key stages
//! query read-only.

mod har;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use url::Url;

pub use memory::MemoryNetworkLog;

/// One observed request/response pair.
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    pub url: Url,
    pub request_headers: HeaderMap,
    pub status: u16,
    pub body: Bytes,
}

impl CapturedExchange {
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            request_headers: HeaderMap::new(),
            status,
            body: body.into(),
        }
    }

    pub fn with_request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Append-only, queryable view of captured traffic.
#[async_trait]
pub trait NetworkLog: Send + Sync {
    /// All exchanges observed so far, in observation order.
    fn exchanges(&self) -> Vec<Arc<CapturedExchange>>;

    /// Exchanges whose full URL contains `needle`.
    fn find_by_substring(&self, needle: &str) -> Vec<Arc<CapturedExchange>> {
        self.exchanges()
            .into_iter()
            .filter(|e| e.url.as_str().contains(needle))
            .collect()
    }

    /// Exchanges whose URL path equals `path`, ignoring the query.
    fn find_by_path(&self, path: &str) -> Vec<Arc<CapturedExchange>> {
        self.exchanges()
            .into_iter()
            .filter(|e| e.url.path() == path)
            .collect()
    }

    /// First successful exchange for `path`.
    fn find_success_by_path(&self, path: &str) -> Option<Arc<CapturedExchange>> {
        self.find_by_path(path).into_iter().find(|e| e.is_success())
    }

    /// Polls until a successful exchange for `path` shows up or `timeout`
    /// elapses. Never waits past the deadline.
    async fn wait_for_path(
        &self,
        path: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<Arc<CapturedExchange>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.find_success_by_path(path) {
                return Some(found);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let step = poll_interval.min(deadline - now);
            tokio::time::sleep(step).await;
        }
    }
}
