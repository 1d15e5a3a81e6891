use crate::hls::HlsError;

/// Errors raised while building the HTTP stack.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),

    #[error("TLS configuration error: {0}")]
    TlsError(String),

    #[error("HLS error: {0}")]
    HlsError(#[from] HlsError),
}
