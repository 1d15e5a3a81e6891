// HLS Segment Fetcher: downloads individual segments with the unit's forwarded headers.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use tracing::{debug, warn};

use crate::hls::HlsError;
use crate::hls::config::FetcherConfig;
use crate::hls::playlist::MediaSegment;
use crate::http::HttpFetcher;

pub struct SegmentFetcher {
    http: Arc<dyn HttpFetcher>,
    preview_count: usize,
    preview_len: usize,
    failures: usize,
    previews_logged: usize,
}

impl SegmentFetcher {
    pub fn new(http: Arc<dyn HttpFetcher>, config: &FetcherConfig) -> Self {
        Self {
            http,
            preview_count: config.preview_count,
            preview_len: config.preview_len,
            failures: 0,
            previews_logged: 0,
        }
    }

    /// Number of failed fetches seen so far.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Number of rejected responses logged with a body preview.
    pub fn previews_logged(&self) -> usize {
        self.previews_logged
    }

    /// Fetches one segment, as a `Range` request for byte-range segments.
    /// Non-success statuses and transport errors become `SegmentFetchFailed`;
    /// the first few rejected responses log a body preview.
    pub async fn fetch(
        &mut self,
        segment: &MediaSegment,
        headers: &HeaderMap,
    ) -> Result<Bytes, HlsError> {
        let ranged;
        let headers = match segment.byte_range {
            Some(span) => {
                let mut with_range = headers.clone();
                let value = HeaderValue::from_str(&span.range_header()).map_err(|e| {
                    HlsError::InvalidInput(format!("Invalid range for segment {}: {e}", segment.index))
                })?;
                with_range.insert(RANGE, value);
                ranged = with_range;
                &ranged
            }
            None => headers,
        };

        let response = match self.http.get(&segment.uri, headers).await {
            Ok(response) => response,
            Err(e) => {
                self.failures += 1;
                warn!(segment = segment.index, url = %segment.uri, "Segment request failed: {e}");
                return Err(HlsError::SegmentFetchFailed {
                    segment: segment.index,
                    reason: e.to_string(),
                });
            }
        };

        if !response.is_success() {
            self.failures += 1;
            if self.previews_logged < self.preview_count {
                self.previews_logged += 1;
                let end = response.body.len().min(self.preview_len);
                warn!(
                    segment = segment.index,
                    url = %segment.uri,
                    status = response.status,
                    preview = %String::from_utf8_lossy(&response.body[..end]),
                    "Segment fetch rejected"
                );
            } else {
                warn!(segment = segment.index, status = response.status, "Segment fetch rejected");
            }
            return Err(HlsError::SegmentFetchFailed {
                segment: segment.index,
                reason: format!("HTTP status {}", response.status),
            });
        }

        let body = match segment.byte_range {
            // the server ignored the Range header and sent the whole resource
            Some(span) if response.status == 200 && response.body.len() as u64 >= span.end() => {
                response.body.slice(span.offset as usize..span.end() as usize)
            }
            _ => response.body,
        };

        debug!(
            segment = segment.index,
            bytes = body.len(),
            "Downloaded segment"
        );
        Ok(body)
    }
}
