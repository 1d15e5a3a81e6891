// Download & assembly pipeline: drives one unit from the captured entry
// playlist to a finished artifact, and a batch of units one after another.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderName, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::capture::{CapturedExchange, NetworkLog};
use crate::hls::HlsError;
use crate::hls::config::PipelineConfig;
use crate::hls::decryption::SegmentDecryptor;
use crate::hls::events::{OnProgress, ProgressEvent, UnitStage};
use crate::hls::fetcher::SegmentFetcher;
use crate::hls::keys::{KeyResolver, ResolvedKey, UnitSession};
use crate::hls::output::AssemblyWriter;
use crate::hls::playlist::{self, MediaPlaylist, Playlist};
use crate::hls::policy;
use crate::hls::remux::{RemuxOutcome, Remuxer};
use crate::hls::selector::RenditionSelector;
use crate::http::{HttpFetcher, SessionFetcher};

/// Request headers copied from the captured playlist request onto every
/// follow-up request of the unit.
const FORWARDED_HEADERS: [HeaderName; 5] = [REFERER, ORIGIN, COOKIE, USER_AGENT, AUTHORIZATION];

const RAW_EXTENSION: &str = "ts";

/// Naming facts for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UnitSpec {
    #[serde(default)]
    pub index: Option<u32>,
    pub title: String,
    /// Group (lecture) title, used as a sub-directory
    #[serde(default)]
    pub group: Option<String>,
}

impl UnitSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Explicit index, else the numeric prefix of the title.
    pub fn effective_index(&self) -> Option<u32> {
        self.index.or_else(|| policy::numeric_prefix(&self.title))
    }

    /// Output file name without extension, e.g. `3 - Ownership`.
    pub fn base_name(&self) -> String {
        let title = policy::sanitize_file_name(&self.title);
        match self.index {
            Some(idx) if title.is_empty() => idx.to_string(),
            Some(idx) if policy::numeric_prefix(&title) != Some(idx) => {
                format!("{idx} - {title}")
            }
            _ if title.is_empty() => "untitled".to_string(),
            _ => title,
        }
    }

    /// Directory the unit is written into.
    pub fn output_dir(&self, dest_dir: &Path) -> PathBuf {
        match self.group.as_deref().map(policy::sanitize_file_name) {
            Some(group) if !group.is_empty() => dest_dir.join(group),
            _ => dest_dir.to_path_buf(),
        }
    }
}

/// A unit together with the capture of its page traffic.
#[derive(Clone)]
pub struct UnitJob {
    pub spec: UnitSpec,
    pub log: Arc<dyn NetworkLog>,
}

impl UnitJob {
    pub fn new(spec: UnitSpec, log: Arc<dyn NetworkLog>) -> Self {
        Self { spec, log }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistenceCheck {
    /// An artifact from an earlier run is present
    Exists(PathBuf),
    /// Earlier artifacts were removed because `force` is set
    ForceOverwrite,
    Absent,
}

/// Per-unit filesystem state, created when the unit starts.
#[derive(Debug, Clone)]
pub struct DownloadState {
    pub dest_dir: PathBuf,
    /// Concatenated transport stream before remux
    pub raw_path: PathBuf,
    /// Remux target, `None` when remux is disabled
    pub final_path: Option<PathBuf>,
    pub existence: ExistenceCheck,
}

impl DownloadState {
    /// Resolves paths for `spec` and runs the pre-check. With `force`,
    /// earlier artifacts are deleted.
    pub async fn prepare(spec: &UnitSpec, config: &PipelineConfig) -> Result<Self, HlsError> {
        let dest_dir = spec.output_dir(&config.output_config.dest_dir);
        let base = spec.base_name();
        let raw_path = dest_dir.join(format!("{base}.{RAW_EXTENSION}"));
        let target_ext = config.output_config.target_extension.trim_start_matches('.');
        let final_path = (config.remux_config.enabled
            && !target_ext.eq_ignore_ascii_case(RAW_EXTENSION))
        .then(|| dest_dir.join(format!("{base}.{target_ext}")));

        let existing = final_path
            .iter()
            .chain(std::iter::once(&raw_path))
            .find(|p| p.exists())
            .cloned();

        let existence = match existing {
            None => ExistenceCheck::Absent,
            Some(path) if !config.output_config.force => ExistenceCheck::Exists(path),
            Some(_) => {
                for path in final_path.iter().chain(std::iter::once(&raw_path)) {
                    if path.exists() {
                        debug!(path = %path.display(), "Removing existing artifact");
                        tokio::fs::remove_file(path).await?;
                    }
                }
                ExistenceCheck::ForceOverwrite
            }
        };

        Ok(Self {
            dest_dir,
            raw_path,
            final_path,
            existence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    AlreadyExists,
    Downloaded,
    /// Finished with the listed segment indices left out
    Partial { missing: Vec<u64> },
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub spec: UnitSpec,
    pub status: UnitStatus,
    /// Artifact on disk: the remuxed file, or the raw file when remux was
    /// skipped or failed
    pub path: PathBuf,
    pub remux: RemuxOutcome,
    pub segments_written: usize,
    pub bytes_written: u64,
    pub key_resolutions: u64,
    pub key_hits: u64,
}

impl UnitReport {
    fn already_exists(spec: &UnitSpec, path: PathBuf) -> Self {
        Self {
            spec: spec.clone(),
            status: UnitStatus::AlreadyExists,
            path,
            remux: RemuxOutcome::Skipped,
            segments_written: 0,
            bytes_written: 0,
            key_resolutions: 0,
            key_hits: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self.status, UnitStatus::Partial { .. })
    }
}

/// Inclusive, zero-based slice of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    pub start: usize,
    pub end: usize,
}

impl BatchRange {
    pub fn new(start: usize, end: usize) -> Result<Self, HlsError> {
        if start > end {
            return Err(HlsError::InvalidInput(format!(
                "batch start {start} is greater than end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Index range into a batch of `len` units, `end` clamped to the last unit.
    pub fn clamp(&self, len: usize) -> std::ops::Range<usize> {
        if len == 0 {
            return 0..0;
        }
        let end = self.end.min(len - 1) + 1;
        self.start.min(end)..end
    }
}

/// Outcome of one attempted unit in a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub spec: UnitSpec,
    pub result: Result<UnitReport, HlsError>,
}

pub struct HlsPipeline {
    config: PipelineConfig,
    http: Arc<dyn HttpFetcher>,
    session_fetcher: Option<Arc<dyn SessionFetcher>>,
    default_headers: HeaderMap,
    on_progress: Option<OnProgress>,
}

impl HlsPipeline {
    pub fn new(config: PipelineConfig, http: Arc<dyn HttpFetcher>) -> Self {
        Self {
            config,
            http,
            session_fetcher: None,
            default_headers: HeaderMap::new(),
            on_progress: None,
        }
    }

    pub fn with_session_fetcher(mut self, fetcher: Arc<dyn SessionFetcher>) -> Self {
        self.session_fetcher = Some(fetcher);
        self
    }

    /// Headers sent with every request; forwarded capture headers override them.
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn with_progress(mut self, on_progress: OnProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.on_progress {
            cb(&event);
        }
    }

    fn enter(&self, unit: &str, stage: UnitStage) {
        debug!(unit, %stage, "Stage transition");
        self.emit(ProgressEvent::Stage {
            unit: unit.to_string(),
            stage,
        });
    }

    /// Processes the selected slice of `jobs` one unit at a time. A failed
    /// unit is recorded and the batch moves on.
    pub async fn run_batch(
        &self,
        jobs: &[UnitJob],
        range: Option<BatchRange>,
    ) -> Result<Vec<BatchEntry>, HlsError> {
        let selected = match range {
            Some(range) => &jobs[range.clamp(jobs.len())],
            None => jobs,
        };
        info!(units = selected.len(), total = jobs.len(), "Starting batch");

        let mut entries = Vec::with_capacity(selected.len());
        for (position, job) in selected.iter().enumerate() {
            info!(
                unit = %job.spec.base_name(),
                "Unit {}/{}",
                position + 1,
                selected.len()
            );
            let result = self.run_unit(&job.spec, job.log.as_ref()).await;
            entries.push(BatchEntry {
                spec: job.spec.clone(),
                result,
            });
        }
        Ok(entries)
    }

    /// Runs one unit to completion. On error no artifact is finalised, so a
    /// re-run retries the whole unit.
    pub async fn run_unit(
        &self,
        spec: &UnitSpec,
        log: &dyn NetworkLog,
    ) -> Result<UnitReport, HlsError> {
        let unit = spec.base_name();
        self.enter(&unit, UnitStage::Idle);

        let state = DownloadState::prepare(spec, &self.config).await?;
        if let ExistenceCheck::Exists(path) = &state.existence {
            info!(unit, path = %path.display(), "Already downloaded, skipping");
            self.enter(&unit, UnitStage::Done);
            return Ok(UnitReport::already_exists(spec, path.clone()));
        }

        match self.download(spec, &unit, &state, log).await {
            Ok(report) => {
                self.enter(&unit, UnitStage::Done);
                Ok(report)
            }
            Err(e) => {
                error!(unit, "Unit failed: {e}");
                self.enter(&unit, UnitStage::Failed);
                Err(e)
            }
        }
    }

    async fn download(
        &self,
        spec: &UnitSpec,
        unit: &str,
        state: &DownloadState,
        log: &dyn NetworkLog,
    ) -> Result<UnitReport, HlsError> {
        self.enter(unit, UnitStage::ResolvingPlaylist);
        let entry = self.find_entry_playlist(log)?;
        let headers = self.forwarded_headers(&entry.request_headers);
        let body = self.entry_playlist_body(&entry).await?;

        let media = match playlist::parse_playlist(&body, &entry.url)? {
            Playlist::Media(media) => media,
            Playlist::Master(master) => {
                self.enter(unit, UnitStage::SelectingRendition);
                RenditionSelector::new(self.http.clone())
                    .select(&master, log, &headers)
                    .await?
                    .playlist
            }
        };

        let signed_query = media
            .url
            .query()
            .or_else(|| entry.url.query())
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        let mut session = UnitSession::new(headers, signed_query);

        self.enter(unit, UnitStage::EnumeratingSegments);
        let media = self.limit_segments(media);
        if media.segments.is_empty() {
            return Err(HlsError::Playlist(format!(
                "media playlist {} has no segments",
                media.url
            )));
        }
        info!(
            unit,
            segments = media.segments.len(),
            duration = media.total_duration(),
            encrypted = media.is_encrypted(),
            "Enumerated segments"
        );
        self.emit(ProgressEvent::SegmentsEnumerated {
            unit: unit.to_string(),
            total: media.segments.len(),
        });

        let keys = if self.config.fetcher_config.keep_encrypted {
            warn!(unit, "Keeping segments encrypted, output will not be playable");
            vec![None; media.segments.len()]
        } else {
            self.enter(unit, UnitStage::ResolvingKeys);
            self.resolve_keys(&media, &mut session, log).await?
        };

        self.enter(unit, UnitStage::FetchingAndDecrypting);
        let assembled = self
            .fetch_and_assemble(unit, &media, &keys, &session, &state.raw_path)
            .await?;

        self.enter(unit, UnitStage::Assembling);
        let raw_path = assembled.writer.finish().await?;
        info!(
            unit,
            path = %raw_path.display(),
            bytes = assembled.bytes_written,
            missing = assembled.missing.len(),
            "Assembled"
        );

        let (path, remux) = match &state.final_path {
            Some(final_path) => {
                self.enter(unit, UnitStage::Remuxing);
                let outcome = Remuxer::new(&self.config.remux_config.tool)
                    .remux(&raw_path, final_path)
                    .await;
                match outcome {
                    RemuxOutcome::Remuxed(_) => (final_path.clone(), outcome),
                    _ => (raw_path, outcome),
                }
            }
            None => (raw_path, RemuxOutcome::Skipped),
        };

        let status = if assembled.missing.is_empty() {
            UnitStatus::Downloaded
        } else {
            UnitStatus::Partial {
                missing: assembled.missing,
            }
        };

        Ok(UnitReport {
            spec: spec.clone(),
            status,
            path,
            remux,
            segments_written: assembled.segments_written,
            bytes_written: assembled.bytes_written,
            key_resolutions: session.cache.resolutions(),
            key_hits: session.cache.hits(),
        })
    }

    /// First captured `.m3u8` request that also matches the playlist filter.
    fn find_entry_playlist(&self, log: &dyn NetworkLog) -> Result<Arc<CapturedExchange>, HlsError> {
        let filter = self.config.playlist_filter.as_deref().unwrap_or("");
        log.find_by_substring(".m3u8")
            .into_iter()
            .find(|e| e.url.as_str().contains(filter))
            .ok_or_else(|| {
                HlsError::NoMediaPlaylistFound(if filter.is_empty() {
                    "no .m3u8 request in capture".to_string()
                } else {
                    format!("no .m3u8 request matching '{filter}' in capture")
                })
            })
    }

    /// Captured body when the capture succeeded, otherwise a re-fetch with
    /// the captured request headers.
    async fn entry_playlist_body(
        &self,
        entry: &CapturedExchange,
    ) -> Result<bytes::Bytes, HlsError> {
        if entry.is_success() {
            return Ok(entry.body.clone());
        }
        debug!(url = %entry.url, status = entry.status, "Re-fetching entry playlist");
        let response = self.http.get(&entry.url, &entry.request_headers).await?;
        if !response.is_success() {
            return Err(HlsError::NoMediaPlaylistFound(format!(
                "{} returned status {}",
                entry.url, response.status
            )));
        }
        Ok(response.body)
    }

    fn forwarded_headers(&self, captured: &HeaderMap) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        for name in &FORWARDED_HEADERS {
            if let Some(value) = captured.get(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers
    }

    fn limit_segments(&self, mut media: MediaPlaylist) -> MediaPlaylist {
        if let Some(max) = self.config.fetcher_config.max_segments
            && media.segments.len() > max
        {
            debug!(max, total = media.segments.len(), "Capping segment count");
            media.segments.truncate(max);
        }
        media
    }

    /// Resolves every segment's key in order before any segment is fetched,
    /// so a key failure aborts the unit with nothing written.
    async fn resolve_keys(
        &self,
        media: &MediaPlaylist,
        session: &mut UnitSession,
        log: &dyn NetworkLog,
    ) -> Result<Vec<Option<ResolvedKey>>, HlsError> {
        let resolver = KeyResolver::new(
            self.http.clone(),
            self.session_fetcher.clone(),
            &self.config.key_config,
        );
        let mut keys = Vec::with_capacity(media.segments.len());
        for segment in &media.segments {
            let key = match &segment.key_uri {
                Some(url) => {
                    let reference = session.key_reference(url.clone());
                    Some(resolver.resolve(session, log, &reference, segment.index).await?)
                }
                None => None,
            };
            keys.push(key);
        }
        debug!(
            resolutions = session.cache.resolutions(),
            hits = session.cache.hits(),
            "Keys resolved"
        );
        Ok(keys)
    }

    async fn fetch_and_assemble(
        &self,
        unit: &str,
        media: &MediaPlaylist,
        keys: &[Option<ResolvedKey>],
        session: &UnitSession,
        raw_path: &Path,
    ) -> Result<Assembled, HlsError> {
        let mut fetcher = SegmentFetcher::new(self.http.clone(), &self.config.fetcher_config);
        let decryptor =
            SegmentDecryptor::new(self.config.key_config.iv_policy, media.media_sequence);
        let mut writer = AssemblyWriter::create(raw_path).await?;
        let mut missing = Vec::new();

        for (segment, key) in media.segments.iter().zip(keys) {
            let data = match fetcher.fetch(segment, &session.headers).await {
                Ok(data) => data,
                Err(e) if e.is_segment_local() => {
                    missing.push(segment.index);
                    self.emit(ProgressEvent::SegmentDropped {
                        unit: unit.to_string(),
                        index: segment.index,
                    });
                    continue;
                }
                Err(e) => {
                    writer.abort().await;
                    return Err(e);
                }
            };

            let plain = match decryptor.decrypt(segment, key.as_ref(), data) {
                Ok(plain) => plain,
                Err(e) => {
                    writer.abort().await;
                    return Err(e);
                }
            };

            if let Err(e) = writer.append(&plain).await {
                writer.abort().await;
                return Err(e);
            }
            self.emit(ProgressEvent::SegmentWritten {
                unit: unit.to_string(),
                index: segment.index,
                bytes: plain.len(),
            });
        }

        if writer.segments_written() == 0 {
            writer.abort().await;
            return Err(HlsError::SegmentFetchFailed {
                segment: media.segments[0].index,
                reason: format!("all {} segments failed", media.segments.len()),
            });
        }
        if !missing.is_empty() {
            warn!(unit, missing = ?missing, "Segments left out of the output");
        }

        Ok(Assembled {
            segments_written: writer.segments_written(),
            bytes_written: writer.bytes_written(),
            writer,
            missing,
        })
    }
}

struct Assembled {
    writer: AssemblyWriter,
    missing: Vec<u64>,
    segments_written: usize,
    bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(UnitSpec::new("Intro").with_index(3).base_name(), "3 - Intro");
        assert_eq!(UnitSpec::new("3. Intro").with_index(3).base_name(), "3. Intro");
        assert_eq!(UnitSpec::new("What is I/O?").base_name(), "What is IO");
        assert_eq!(UnitSpec::new("").with_index(9).base_name(), "9");
        assert_eq!(UnitSpec::new("12 - Traits").effective_index(), Some(12));
    }

    #[test]
    fn test_output_dir_uses_sanitized_group() {
        let spec = UnitSpec::new("Intro").with_group("Rust: Zero to Hero");
        assert_eq!(
            spec.output_dir(Path::new("/dl")),
            PathBuf::from("/dl/Rust Zero to Hero")
        );
        assert_eq!(UnitSpec::new("Intro").output_dir(Path::new("/dl")), PathBuf::from("/dl"));
    }

    #[test]
    fn test_batch_range() {
        assert!(matches!(BatchRange::new(5, 2), Err(HlsError::InvalidInput(_))));
        let range = BatchRange::new(1, 100).unwrap();
        assert_eq!(range.clamp(4), 1..4);
        assert_eq!(BatchRange::new(0, 0).unwrap().clamp(4), 0..1);
        assert_eq!(BatchRange::new(6, 9).unwrap().clamp(4), 4..4);
        assert_eq!(range.clamp(0), 0..0);
    }

    #[tokio::test]
    async fn test_prepare_detects_existing_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path());
        let spec = UnitSpec::new("Intro").with_index(1);
        std::fs::write(dir.path().join("1 - Intro.ts"), b"x").unwrap();

        let state = DownloadState::prepare(&spec, &config).await.unwrap();
        assert_eq!(
            state.existence,
            ExistenceCheck::Exists(dir.path().join("1 - Intro.ts"))
        );
        assert_eq!(state.final_path, Some(dir.path().join("1 - Intro.mp4")));
    }

    #[tokio::test]
    async fn test_prepare_force_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path()).with_force(true);
        let spec = UnitSpec::new("Intro").with_index(1);
        std::fs::write(dir.path().join("1 - Intro.ts"), b"x").unwrap();
        std::fs::write(dir.path().join("1 - Intro.mp4"), b"y").unwrap();

        let state = DownloadState::prepare(&spec, &config).await.unwrap();
        assert_eq!(state.existence, ExistenceCheck::ForceOverwrite);
        assert!(!dir.path().join("1 - Intro.ts").exists());
        assert!(!dir.path().join("1 - Intro.mp4").exists());
    }
}
