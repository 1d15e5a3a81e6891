use reqwest::Client;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{DownloadError, DownloaderConfig, proxy::build_proxy_from_config};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::TlsError(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| DownloadError::TlsError(e.to_string()))?
        .with_no_client_auth();

    // Segments are fetched one at a time, a small idle pool is enough
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(2)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = build_proxy_from_config(proxy_config)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(DownloadError::from)
}
