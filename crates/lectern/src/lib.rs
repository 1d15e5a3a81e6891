//! # Lectern
//!
//! Resolves an HLS lecture presentation into one decrypted, ordered
//! transport stream, optionally remuxed into an MP4 container.
//!
//! The engine never drives a browser. It works from traffic observed by
//! some capture facility (see [`capture::NetworkLog`]) and from naming facts
//! supplied by the caller (see [`hls::UnitSpec`]).
//!
//! ## Features
//!
//! - Duration-based rendition selection with thumbnail/subtitle rejection
//! - AES-128 key resolution from captured traffic, network and session
//! - Idempotent re-runs with skip-if-exists and forced overwrite
//! - HAR replay of recorded browser sessions

pub mod builder;
pub mod capture;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hls;
pub mod http;
pub mod proxy;

pub use builder::DownloaderConfigBuilder;
pub use config::DownloaderConfig;
pub use error::DownloadError;

pub use capture::{CapturedExchange, MemoryNetworkLog, NetworkLog};
pub use http::{CookieSessionFetcher, HttpFetcher, HttpResponse, ReqwestFetcher, SessionFetcher};

// Re-export downloader utilities
pub use downloader::create_client;

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
