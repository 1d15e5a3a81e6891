//! # Builder for DownloaderConfig
//!
//! Fluent construction of [`DownloaderConfig`] for the HTTP side of the engine.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use lectern_engine::DownloaderConfig;
//!
//! let config = DownloaderConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_user_agent("Lectern/0.1")
//!     .with_header("Referer", "https://www.example.com/")
//!     .build();
//! assert_eq!(config.timeout, Duration::from_secs(60));
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{DownloaderConfig, proxy::ProxyConfig};

/// Builder for creating DownloaderConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Set the overall timeout for a single HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the pooled connection idle timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header, ignoring invalid names or values
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge headers over the defaults; later values win
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set the proxy configuration
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self.config.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.proxy.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProxyAuth, ProxyType};

    #[test]
    fn test_builder_defaults() {
        let config = DownloaderConfigBuilder::new().build();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.follow_redirects);
        assert!(config.use_system_proxy);
        assert!(config.headers.contains_key(reqwest::header::ACCEPT));
    }

    #[test]
    fn test_headers_merge_over_defaults() {
        let mut extra = HeaderMap::new();
        extra.insert(reqwest::header::ACCEPT, HeaderValue::from_static("video/*"));
        extra.insert(
            reqwest::header::REFERER,
            HeaderValue::from_static("https://www.example.com/"),
        );

        let config = DownloaderConfigBuilder::new().with_headers(extra).build();

        assert_eq!(config.headers.get("accept").unwrap(), "video/*");
        assert_eq!(
            config.headers.get("referer").unwrap(),
            "https://www.example.com/"
        );
        // defaults that were not overridden survive
        assert!(config.headers.contains_key(reqwest::header::ACCEPT_LANGUAGE));
    }

    #[test]
    fn test_invalid_header_is_ignored() {
        let config = DownloaderConfigBuilder::new()
            .with_header("bad header", "value")
            .build();
        assert!(config.headers.get("bad header").is_none());
    }

    #[test]
    fn test_explicit_proxy_disables_system_proxy() {
        let config = DownloaderConfigBuilder::new()
            .with_proxy(crate::ProxyConfig {
                url: "http://proxy.example.com:8080".to_string(),
                proxy_type: ProxyType::Http,
                auth: Some(ProxyAuth {
                    username: "user".to_string(),
                    password: "pass".to_string(),
                }),
            })
            .with_system_proxy(true)
            .build();

        assert!(config.proxy.is_some());
        assert!(!config.use_system_proxy);
    }
}
