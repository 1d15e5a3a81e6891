// HAR (HTTP Archive) replay: turns a recorded browser session into a capture log.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{CapturedExchange, MemoryNetworkLog};
use crate::hls::HlsError;

#[derive(Debug, Deserialize)]
struct Har {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    response: HarResponse,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    status: i64,
    #[serde(default)]
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
struct HarContent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

impl MemoryNetworkLog {
    /// Parses a HAR document. Entries with unparseable URLs are skipped.
    pub fn from_har_bytes(bytes: &[u8]) -> Result<Self, HlsError> {
        let har: Har = serde_json::from_slice(bytes)
            .map_err(|e| HlsError::Capture(format!("Invalid HAR document: {e}")))?;

        let log = MemoryNetworkLog::new();
        for entry in har.log.entries {
            match convert_entry(entry) {
                Some(exchange) => log.record(exchange),
                None => continue,
            }
        }
        debug!(entries = log.len(), "Loaded HAR capture");
        Ok(log)
    }

    pub async fn from_har_file(path: &Path) -> Result<Self, HlsError> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_har_bytes(&bytes)
    }
}

fn convert_entry(entry: HarEntry) -> Option<CapturedExchange> {
    let url = match Url::parse(&entry.request.url) {
        Ok(url) => url,
        Err(e) => {
            warn!(url = %entry.request.url, "Skipping HAR entry: {e}");
            return None;
        }
    };

    let mut headers = HeaderMap::new();
    for header in &entry.request.headers {
        // HTTP/2 pseudo headers (":authority" etc.) are not real request headers
        if header.name.starts_with(':') {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(header.name.as_bytes()),
            HeaderValue::from_str(&header.value),
        ) {
            headers.append(name, value);
        }
    }

    let body = match (entry.response.content.text, entry.response.content.encoding) {
        (Some(text), Some(encoding)) if encoding.eq_ignore_ascii_case("base64") => {
            match STANDARD.decode(text.as_bytes()) {
                Ok(decoded) => Bytes::from(decoded),
                Err(e) => {
                    warn!(url = %url, "Undecodable base64 body in HAR entry: {e}");
                    Bytes::new()
                }
            }
        }
        (Some(text), _) => Bytes::from(text),
        (None, _) => Bytes::new(),
    };

    let status = u16::try_from(entry.response.status).unwrap_or(0);

    Some(CapturedExchange::new(url, status, body).with_request_headers(headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NetworkLog;

    const HAR: &str = r##"{
      "log": {
        "version": "1.2",
        "entries": [
          {
            "request": {
              "method": "GET",
              "url": "https://vod.example.com/v/master.m3u8?Policy=abc",
              "headers": [
                {"name": ":authority", "value": "vod.example.com"},
                {"name": "Referer", "value": "https://www.example.com/course/1"},
                {"name": "Cookie", "value": "sid=42"}
              ]
            },
            "response": {
              "status": 200,
              "content": {"mimeType": "application/vnd.apple.mpegurl", "text": "#EXTM3U\n"}
            }
          },
          {
            "request": {"method": "GET", "url": "https://vod.example.com/v/key.bin", "headers": []},
            "response": {
              "status": 200,
              "content": {"text": "AAECAwQFBgcICQoLDA0ODw==", "encoding": "base64"}
            }
          },
          {
            "request": {"method": "GET", "url": "not a url", "headers": []},
            "response": {"status": 0, "content": {}}
          }
        ]
      }
    }"##;

    #[test]
    fn test_har_entries_are_converted() {
        let log = MemoryNetworkLog::from_har_bytes(HAR.as_bytes()).unwrap();
        assert_eq!(log.len(), 2);

        let playlist = &log.find_by_substring(".m3u8")[0];
        assert_eq!(playlist.status, 200);
        assert_eq!(
            playlist.request_headers.get("referer").unwrap(),
            "https://www.example.com/course/1"
        );
        assert!(playlist.request_headers.get(":authority").is_none());

        let key = log.find_success_by_path("/v/key.bin").unwrap();
        assert_eq!(key.body.as_ref(), (0u8..16).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_invalid_har_is_a_capture_error() {
        let err = MemoryNetworkLog::from_har_bytes(b"{\"nope\": 1}").unwrap_err();
        assert!(matches!(err, HlsError::Capture(_)));
    }
}
