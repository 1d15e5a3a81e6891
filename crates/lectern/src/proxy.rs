use std::str::FromStr;

use reqwest::Proxy;

use crate::DownloadError;

/// Which traffic the proxy applies to
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
    /// All protocols
    All,
}

impl FromStr for ProxyType {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" => Ok(ProxyType::Socks5),
            "all" => Ok(ProxyType::All),
            other => Err(DownloadError::ProxyError(format!(
                "Unknown proxy type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

/// Build a reqwest Proxy from our proxy configuration
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, DownloadError> {
    let proxy_url = &config.url;

    let mut proxy = match config.proxy_type {
        ProxyType::Http => Proxy::http(proxy_url),
        ProxyType::Https => Proxy::https(proxy_url),
        ProxyType::Socks5 => {
            if proxy_url.starts_with("socks5://") {
                Proxy::all(proxy_url)
            } else {
                Proxy::all(format!("socks5://{proxy_url}"))
            }
        }
        ProxyType::All => Proxy::all(proxy_url),
    }
    .map_err(|e| DownloadError::ProxyError(format!("Invalid proxy URL {proxy_url}: {e}")))?;

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}
