//! HTTP seam used by every stage that talks to the network.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER};
use tracing::trace;
use url::Url;

use crate::hls::HlsError;
use crate::{DownloadError, DownloaderConfig, create_client};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Plain GET with per-request header injection.
///
/// Non-success statuses are returned as responses, only transport failures
/// become errors.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, HlsError>;
}

/// Fetch performed with the viewing session's own credentials, used when the
/// standalone client lacks auth state.
#[async_trait]
pub trait SessionFetcher: Send + Sync {
    async fn fetch_in_session(&self, url: &Url) -> Result<HttpResponse, HlsError>;
}

#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Ok(Self::new(create_client(config)?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, HlsError> {
        trace!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Session fetch backed by an exported browser cookie string.
pub struct CookieSessionFetcher {
    client: Client,
    headers: HeaderMap,
}

impl CookieSessionFetcher {
    pub fn new(client: Client, cookie: &str, referer: Option<&str>) -> Result<Self, HlsError> {
        let mut headers = HeaderMap::new();
        let cookie = HeaderValue::from_str(cookie)
            .map_err(|e| HlsError::InvalidInput(format!("Invalid session cookie: {e}")))?;
        headers.insert(COOKIE, cookie);
        if let Some(referer) = referer {
            let referer = HeaderValue::from_str(referer)
                .map_err(|e| HlsError::InvalidInput(format!("Invalid referer: {e}")))?;
            headers.insert(REFERER, referer);
        }
        Ok(Self { client, headers })
    }
}

#[async_trait]
impl SessionFetcher for CookieSessionFetcher {
    async fn fetch_in_session(&self, url: &Url) -> Result<HttpResponse, HlsError> {
        let response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }
}
