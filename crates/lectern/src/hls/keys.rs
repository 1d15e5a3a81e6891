// Key resolution: turns a key reference into 16 bytes of AES-128 key material,
// preferring what the page already fetched over new network requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tracing::{debug, trace, warn};
use url::Url;

use crate::capture::NetworkLog;
use crate::hls::HlsError;
use crate::hls::config::KeyConfig;
use crate::hls::policy;
use crate::http::{HttpFetcher, HttpResponse, SessionFetcher};

pub const KEY_LEN: usize = 16;

/// A key location plus the cache identity derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReference {
    pub url: Url,
    /// URL path; references with equal paths share key material
    pub path: String,
    /// Query of the signed playlist fetch, appended on retry
    pub signed_query: Option<String>,
}

impl KeyReference {
    pub fn new(url: Url, signed_query: Option<String>) -> Self {
        let path = url.path().to_string();
        Self {
            url,
            path,
            signed_query,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedKey([u8; KEY_LEN]);

impl ResolvedKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Where a key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Cache,
    Capture,
    CaptureWait,
    Network,
    SignedRetry,
    Session,
}

/// Per-unit key cache keyed by URL path.
#[derive(Debug, Default)]
pub struct KeyCache {
    keys: HashMap<String, ResolvedKey>,
    hits: u64,
    resolutions: u64,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a key, counting a hit when found.
    pub fn get(&mut self, path: &str) -> Option<ResolvedKey> {
        let found = self.keys.get(path).copied();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    /// Stores a freshly resolved key.
    pub fn insert(&mut self, path: impl Into<String>, key: ResolvedKey) {
        self.resolutions += 1;
        self.keys.insert(path.into(), key);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn resolutions(&self) -> u64 {
        self.resolutions
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// State owned by one unit: forwarded headers, the signed query inherited
/// from the playlist fetch, and the key cache. Dropped with the unit.
#[derive(Debug, Default)]
pub struct UnitSession {
    pub headers: HeaderMap,
    pub signed_query: Option<String>,
    pub cache: KeyCache,
}

impl UnitSession {
    pub fn new(headers: HeaderMap, signed_query: Option<String>) -> Self {
        Self {
            headers,
            signed_query,
            cache: KeyCache::new(),
        }
    }

    pub fn key_reference(&self, url: Url) -> KeyReference {
        KeyReference::new(url, self.signed_query.clone())
    }
}

pub struct KeyResolver {
    http: Arc<dyn HttpFetcher>,
    session_fetcher: Option<Arc<dyn SessionFetcher>>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl KeyResolver {
    pub fn new(
        http: Arc<dyn HttpFetcher>,
        session_fetcher: Option<Arc<dyn SessionFetcher>>,
        config: &KeyConfig,
    ) -> Self {
        Self {
            http,
            session_fetcher,
            wait_timeout: config.capture_wait_timeout,
            poll_interval: config.capture_poll_interval,
        }
    }

    /// Resolves the key for `segment`, trying the unit cache, the capture
    /// log, a bounded wait on the capture log, a direct fetch (with one
    /// signed-query retry) and finally the in-session fetch.
    pub async fn resolve(
        &self,
        session: &mut UnitSession,
        log: &dyn NetworkLog,
        key: &KeyReference,
        segment: u64,
    ) -> Result<ResolvedKey, HlsError> {
        if let Some(cached) = session.cache.get(&key.path) {
            trace!(segment, key_path = %key.path, "Key cache hit");
            return Ok(cached);
        }

        let (resolved, source) = self.resolve_uncached(session, log, key, segment).await?;
        debug!(segment, key_path = %key.path, ?source, "Resolved key");
        session.cache.insert(key.path.clone(), resolved);
        Ok(resolved)
    }

    async fn resolve_uncached(
        &self,
        session: &UnitSession,
        log: &dyn NetworkLog,
        key: &KeyReference,
        segment: u64,
    ) -> Result<(ResolvedKey, KeySource), HlsError> {
        if let Some(exchange) = log.find_success_by_path(&key.path) {
            return Ok((validate(&exchange.body, key, segment)?, KeySource::Capture));
        }

        if !self.wait_timeout.is_zero() {
            trace!(segment, key_path = %key.path, "Waiting for key in capture log");
            if let Some(exchange) = log
                .wait_for_path(&key.path, self.wait_timeout, self.poll_interval)
                .await
            {
                return Ok((
                    validate(&exchange.body, key, segment)?,
                    KeySource::CaptureWait,
                ));
            }
        }

        if let Some(response) = self.fetch(&key.url, &session.headers, segment).await {
            return Ok((validate(&response.body, key, segment)?, KeySource::Network));
        }

        if let Some(query) = key.signed_query.as_deref().filter(|q| !q.is_empty())
            && !policy::has_signing_params(&key.url)
        {
            let signed = policy::with_inherited_query(&key.url, query);
            debug!(segment, key_path = %key.path, "Retrying key fetch with playlist query");
            if let Some(response) = self.fetch(&signed, &session.headers, segment).await {
                return Ok((
                    validate(&response.body, key, segment)?,
                    KeySource::SignedRetry,
                ));
            }
        }

        if let Some(session_fetcher) = &self.session_fetcher {
            match session_fetcher.fetch_in_session(&key.url).await {
                Ok(response) if response.is_success() => {
                    return Ok((validate(&response.body, key, segment)?, KeySource::Session));
                }
                Ok(response) => {
                    warn!(segment, key_path = %key.path, status = response.status, "In-session key fetch rejected");
                }
                Err(e) => {
                    warn!(segment, key_path = %key.path, "In-session key fetch failed: {e}");
                }
            }
        }

        Err(HlsError::KeyResolutionFailed {
            segment,
            key_path: key.path.clone(),
        })
    }

    /// Successful response or `None`; failures are logged and fall through.
    async fn fetch(&self, url: &Url, headers: &HeaderMap, segment: u64) -> Option<HttpResponse> {
        match self.http.get(url, headers).await {
            Ok(response) if response.is_success() => Some(response),
            Ok(response) => {
                debug!(segment, %url, status = response.status, "Key fetch rejected");
                None
            }
            Err(e) => {
                debug!(segment, %url, "Key fetch failed: {e}");
                None
            }
        }
    }
}

fn validate(body: &[u8], key: &KeyReference, segment: u64) -> Result<ResolvedKey, HlsError> {
    let bytes: [u8; KEY_LEN] = body.try_into().map_err(|_| HlsError::InvalidKeyLength {
        segment,
        key_path: key.path.clone(),
        len: body.len(),
    })?;
    Ok(ResolvedKey::new(bytes))
}
