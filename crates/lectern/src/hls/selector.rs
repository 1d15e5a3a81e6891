// Rendition selection: measures every program rendition of a master playlist
// and keeps the one with the longest total duration.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::capture::NetworkLog;
use crate::hls::HlsError;
use crate::hls::playlist::{self, MasterPlaylist, MediaPlaylist, Playlist};
use crate::hls::policy;
use crate::http::HttpFetcher;

/// A measured rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRendition {
    pub url: Url,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct SelectedRendition {
    pub candidate: CandidateRendition,
    pub playlist: MediaPlaylist,
}

pub struct RenditionSelector {
    http: Arc<dyn HttpFetcher>,
}

impl RenditionSelector {
    pub fn new(http: Arc<dyn HttpFetcher>) -> Self {
        Self { http }
    }

    pub async fn select(
        &self,
        master: &MasterPlaylist,
        log: &dyn NetworkLog,
        headers: &HeaderMap,
    ) -> Result<SelectedRendition, HlsError> {
        if master.variants.is_empty() {
            return Err(HlsError::NoPlayableRendition(format!(
                "{} lists no program renditions",
                master.url
            )));
        }

        let mut measured = Vec::with_capacity(master.variants.len());
        for variant in &master.variants {
            match self.measure(&variant.uri, log, headers).await {
                Ok(Some(playlist)) => {
                    let duration = playlist.total_duration();
                    debug!(url = %variant.uri, duration, "Measured rendition");
                    measured.push((playlist, duration));
                }
                Ok(None) => {}
                Err(e @ HlsError::UnsupportedDrm(_)) => return Err(e),
                Err(e) => {
                    warn!(url = %variant.uri, "Skipping rendition: {e}");
                }
            }
        }

        let (playlist, duration) = policy::pick_longest(measured).ok_or_else(|| {
            HlsError::NoPlayableRendition(format!(
                "none of the {} renditions of {} could be loaded",
                master.variants.len(),
                master.url
            ))
        })?;
        info!(url = %playlist.url, duration, "Selected rendition");
        Ok(SelectedRendition {
            candidate: CandidateRendition {
                url: playlist.url.clone(),
                duration,
            },
            playlist,
        })
    }

    /// Loads and parses one candidate. `Ok(None)` means the candidate was
    /// rejected without an error worth surfacing.
    async fn measure(
        &self,
        url: &Url,
        log: &dyn NetworkLog,
        headers: &HeaderMap,
    ) -> Result<Option<MediaPlaylist>, HlsError> {
        let (body, source_url) = match self.load(url, log, headers).await? {
            Some(loaded) => loaded,
            None => return Ok(None),
        };
        match playlist::parse_playlist(&body, &source_url)? {
            Playlist::Media(media) => Ok(Some(media)),
            Playlist::Master(_) => {
                warn!(%url, "Rendition is itself a master playlist, skipping");
                Ok(None)
            }
        }
    }

    async fn load(
        &self,
        url: &Url,
        log: &dyn NetworkLog,
        headers: &HeaderMap,
    ) -> Result<Option<(Bytes, Url)>, HlsError> {
        if let Some(exchange) = log.find_success_by_path(url.path()) {
            debug!(%url, "Using captured rendition playlist");
            return Ok(Some((exchange.body.clone(), exchange.url.clone())));
        }
        let response = self.http.get(url, headers).await?;
        if !response.is_success() {
            warn!(%url, status = response.status, "Rendition playlist fetch rejected");
            return Ok(None);
        }
        Ok(Some((response.body, url.clone())))
    }
}
