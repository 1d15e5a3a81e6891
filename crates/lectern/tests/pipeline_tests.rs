use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use parking_lot::Mutex;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER};
use url::Url;

use lectern_engine::hls::decryption::derive_iv;
use lectern_engine::hls::{
    BatchRange, HlsError, HlsPipeline, PipelineConfig, RemuxOutcome, UnitJob, UnitSpec,
    UnitStatus,
};
use lectern_engine::{CapturedExchange, HttpFetcher, HttpResponse, MemoryNetworkLog, NetworkLog};

const BASE: &str = "https://vod.example.com/course/42/";
const KEY: [u8; 16] = *b"0123456789abcdef";

fn init_tracing() {
    let _ = tracing_subscriber::fmt::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Serves canned responses by full URL and records each request.
#[derive(Default)]
struct FakeHttp {
    responses: HashMap<String, (u16, Bytes)>,
    requests: Mutex<Vec<(String, HeaderMap)>>,
}

impl FakeHttp {
    fn serve(&mut self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.responses.insert(url.to_string(), (status, body.into()));
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn requests_to(&self, needle: &str) -> Vec<(String, HeaderMap)> {
        self.requests
            .lock()
            .iter()
            .filter(|(url, _)| url.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpFetcher for FakeHttp {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, HlsError> {
        self.requests
            .lock()
            .push((url.to_string(), headers.clone()));
        let (status, body) = self
            .responses
            .get(url.as_str())
            .cloned()
            .unwrap_or((404, Bytes::from_static(b"<Error>NoSuchKey</Error>")));
        Ok(HttpResponse { status, body })
    }
}

fn url(path: &str) -> Url {
    Url::parse(&format!("{BASE}{path}")).unwrap()
}

fn payload(index: usize) -> Vec<u8> {
    format!("segment-{index:03}-transport-stream-payload").into_bytes()
}

fn encrypt(plain: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    cbc::Encryptor::<Aes128>::new_from_slices(&KEY, iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plain)
}

/// Media playlist with `count` segments under one key without explicit IV.
fn encrypted_media_playlist(count: usize) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n\
         #EXT-X-KEY:METHOD=AES-128,URI=\"keys/unit.key\"\n",
    );
    for i in 0..count {
        out.push_str(&format!("#EXTINF:6.0,\nseg{i:03}.ts\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// Serves `count` encrypted segments and returns the expected plaintext.
fn serve_segments(http: &mut FakeHttp, count: usize) -> Vec<u8> {
    let mut expected = Vec::new();
    for i in 0..count {
        let plain = payload(i);
        http.serve(
            url(&format!("seg{i:03}.ts")).as_str(),
            200,
            encrypt(&plain, &derive_iv(i as u64)),
        );
        expected.extend_from_slice(&plain);
    }
    expected
}

fn playlist_request_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, HeaderValue::from_static("https://www.example.com/course/42"));
    headers.insert(COOKIE, HeaderValue::from_static("session=abc"));
    headers.insert("x-not-forwarded", HeaderValue::from_static("1"));
    headers
}

/// Capture of a page that loaded a media playlist and its key.
fn capture_with_media(count: usize) -> MemoryNetworkLog {
    let log = MemoryNetworkLog::new();
    log.record(
        CapturedExchange::new(
            url("index.m3u8?Policy=p&Signature=s"),
            200,
            encrypted_media_playlist(count),
        )
        .with_request_headers(playlist_request_headers()),
    );
    log.record(CapturedExchange::new(url("keys/unit.key"), 200, KEY.to_vec()));
    log
}

fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig::new(dir)
        .with_remux(false)
        .with_capture_wait(Duration::ZERO, Duration::from_millis(1))
}

#[tokio::test]
async fn test_segments_are_decrypted_in_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    let expected = serve_segments(&mut http, 8);
    let http = Arc::new(http);

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let spec = UnitSpec::new("Ownership").with_index(3);
    let report = pipeline.run_unit(&spec, &capture_with_media(8)).await.unwrap();

    assert_eq!(report.status, UnitStatus::Downloaded);
    assert_eq!(report.path, dir.path().join("3 - Ownership.ts"));
    assert_eq!(report.segments_written, 8);
    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
    // key came from the capture log, only segments hit the network
    assert_eq!(http.request_count(), 8);
}

#[tokio::test]
async fn test_rerun_without_force_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 4);
    let http = Arc::new(http);
    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let spec = UnitSpec::new("Intro").with_index(1);
    let log = capture_with_media(4);

    let first = pipeline.run_unit(&spec, &log).await.unwrap();
    let bytes_before = std::fs::read(&first.path).unwrap();
    let requests_before = http.request_count();

    let second = pipeline.run_unit(&spec, &log).await.unwrap();
    assert_eq!(second.status, UnitStatus::AlreadyExists);
    assert_eq!(second.path, first.path);
    assert_eq!(http.request_count(), requests_before);
    assert_eq!(std::fs::read(&first.path).unwrap(), bytes_before);
}

#[tokio::test]
async fn test_force_downloads_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    let expected = serve_segments(&mut http, 2);
    let http = Arc::new(http);
    let spec = UnitSpec::new("Intro").with_index(1);
    std::fs::write(dir.path().join("1 - Intro.ts"), b"stale").unwrap();

    let pipeline = HlsPipeline::new(config(dir.path()).with_force(true), http.clone());
    let report = pipeline.run_unit(&spec, &capture_with_media(2)).await.unwrap();

    assert_eq!(report.status, UnitStatus::Downloaded);
    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
}

#[tokio::test]
async fn test_drm_playlist_is_rejected_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let http = Arc::new(FakeHttp::default());
    let log = MemoryNetworkLog::new();
    log.record(CapturedExchange::new(
        url("index.m3u8"),
        200,
        "#EXTM3U\n#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"skd://asset-42\",KEYFORMAT=\"com.apple.streamingkeydelivery\"\n#EXTINF:6.0,\nseg000.ts\n",
    ));

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let err = pipeline
        .run_unit(&UnitSpec::new("Locked"), &log)
        .await
        .unwrap_err();

    assert!(matches!(err, HlsError::UnsupportedDrm(_)));
    assert_eq!(http.request_count(), 0);
    assert!(!dir.path().join("Locked.ts").exists());
}

#[tokio::test]
async fn test_master_playlist_picks_longest_rendition() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    let expected = serve_segments(&mut http, 3);

    let master = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=200000\npreview/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=50000\nthumbnails/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1500000\nfull.m3u8\n";
    let preview = "#EXTM3U\n#EXTINF:10.0,\np0.ts\n#EXT-X-ENDLIST\n";
    http.serve(url("preview/index.m3u8").as_str(), 200, preview);
    http.serve(url("full.m3u8").as_str(), 200, encrypted_media_playlist(3));
    let http = Arc::new(http);

    let log = MemoryNetworkLog::new();
    log.record(
        CapturedExchange::new(url("master.m3u8?token=t1"), 200, master)
            .with_request_headers(playlist_request_headers()),
    );
    log.record(CapturedExchange::new(url("keys/unit.key"), 200, KEY.to_vec()));

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Lifetimes"), &log)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
    assert!(http.requests_to("thumbnails").is_empty());
    assert!(http.requests_to("p0.ts").is_empty());
}

#[tokio::test]
async fn test_one_key_resolution_for_fifty_segments() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 50);
    let http = Arc::new(http);

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Long"), &capture_with_media(50))
        .await
        .unwrap();

    assert_eq!(report.key_resolutions, 1);
    assert_eq!(report.key_hits, 49);
}

#[tokio::test]
async fn test_missing_segment_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 10);
    http.serve(url("seg003.ts").as_str(), 404, "<Error>NoSuchKey</Error>");
    let http = Arc::new(http);

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Gappy"), &capture_with_media(10))
        .await
        .unwrap();

    let expected: Vec<u8> = (0..10).filter(|i| *i != 3).flat_map(payload).collect();
    assert_eq!(report.status, UnitStatus::Partial { missing: vec![3] });
    assert_eq!(report.segments_written, 9);
    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
}

#[tokio::test]
async fn test_key_failure_leaves_no_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 3);
    let http = Arc::new(http);

    // playlist captured, key neither captured nor fetchable
    let log = MemoryNetworkLog::new();
    log.record(CapturedExchange::new(
        url("index.m3u8"),
        200,
        encrypted_media_playlist(3),
    ));

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let err = pipeline
        .run_unit(&UnitSpec::new("NoKey"), &log)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HlsError::KeyResolutionFailed { segment: 0, ref key_path } if key_path == "/course/42/keys/unit.key"
    ));
    assert!(http.requests_to(".ts").is_empty());
    assert!(!dir.path().join("NoKey.ts").exists());
    assert!(!dir.path().join("NoKey.ts.part").exists());
}

#[tokio::test]
async fn test_signed_query_is_inherited_for_key_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    let expected = serve_segments(&mut http, 2);
    http.serve(
        url("keys/unit.key?Policy=p&Signature=s").as_str(),
        200,
        KEY.to_vec(),
    );
    let http = Arc::new(http);

    let log = MemoryNetworkLog::new();
    log.record(CapturedExchange::new(
        url("index.m3u8?Policy=p&Signature=s"),
        200,
        encrypted_media_playlist(2),
    ));

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Signed"), &log)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
    assert_eq!(http.requests_to("unit.key").len(), 2);
}

#[tokio::test]
async fn test_failed_capture_is_refetched_and_headers_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 2);
    http.serve(url("index.m3u8").as_str(), 200, encrypted_media_playlist(2));
    let http = Arc::new(http);

    let log = MemoryNetworkLog::new();
    log.record(
        CapturedExchange::new(url("index.m3u8"), 403, "expired")
            .with_request_headers(playlist_request_headers()),
    );
    log.record(CapturedExchange::new(url("keys/unit.key"), 200, KEY.to_vec()));

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    pipeline
        .run_unit(&UnitSpec::new("Refetch"), &log)
        .await
        .unwrap();

    let playlist_requests = http.requests_to("index.m3u8");
    assert_eq!(playlist_requests.len(), 1);
    assert_eq!(playlist_requests[0].1.get(COOKIE).unwrap(), "session=abc");

    for (_, headers) in http.requests_to(".ts") {
        assert_eq!(headers.get(COOKIE).unwrap(), "session=abc");
        assert_eq!(headers.get(REFERER).unwrap(), "https://www.example.com/course/42");
        assert!(headers.get("x-not-forwarded").is_none());
    }
}

#[tokio::test]
async fn test_playlist_filter_and_missing_playlist() {
    let dir = tempfile::tempdir().unwrap();
    let http = Arc::new(FakeHttp::default());
    let log = capture_with_media(1);

    let pipeline = HlsPipeline::new(
        config(dir.path()).with_playlist_filter("does-not-match"),
        http.clone(),
    );
    let err = pipeline
        .run_unit(&UnitSpec::new("Filtered"), &log)
        .await
        .unwrap_err();
    assert!(matches!(err, HlsError::NoMediaPlaylistFound(_)));
}

#[tokio::test]
async fn test_remux_failure_keeps_raw_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    let expected = serve_segments(&mut http, 2);
    let http = Arc::new(http);

    let config = config(dir.path())
        .with_remux(true)
        .with_remux_tool(dir.path().join("missing-ffmpeg"));
    let pipeline = HlsPipeline::new(config, http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Remux"), &capture_with_media(2))
        .await
        .unwrap();

    assert_eq!(report.status, UnitStatus::Downloaded);
    assert!(matches!(report.remux, RemuxOutcome::Failed(_)));
    assert_eq!(report.path, dir.path().join("Remux.ts"));
    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
    assert!(!dir.path().join("Remux.mp4").exists());
}

#[tokio::test]
async fn test_batch_continues_after_failed_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 2);
    let http = Arc::new(http);

    let good: Arc<dyn NetworkLog> = Arc::new(capture_with_media(2));
    let empty: Arc<dyn NetworkLog> = Arc::new(MemoryNetworkLog::new());
    let jobs = vec![
        UnitJob::new(UnitSpec::new("Skipped").with_index(1), good.clone()),
        UnitJob::new(UnitSpec::new("Broken").with_index(2), empty),
        UnitJob::new(
            UnitSpec::new("Works").with_index(3).with_group("Part: One"),
            good,
        ),
    ];

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let entries = pipeline
        .run_batch(&jobs, Some(BatchRange::new(1, 99).unwrap()))
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert!(matches!(
        entries[0].result,
        Err(HlsError::NoMediaPlaylistFound(_))
    ));
    let report = entries[1].result.as_ref().unwrap();
    assert_eq!(report.path, dir.path().join("Part One").join("3 - Works.ts"));
    assert!(!dir.path().join("1 - Skipped.ts").exists());
}

#[tokio::test]
async fn test_keep_encrypted_skips_key_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 3);
    let http = Arc::new(http);

    // the key is neither captured nor served: it must not be needed
    let log = MemoryNetworkLog::new();
    log.record(CapturedExchange::new(
        url("index.m3u8"),
        200,
        encrypted_media_playlist(3),
    ));

    let pipeline = HlsPipeline::new(config(dir.path()).with_keep_encrypted(true), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Sealed"), &log)
        .await
        .unwrap();

    let ciphertext: Vec<u8> = (0..3)
        .flat_map(|i| encrypt(&payload(i), &derive_iv(i as u64)))
        .collect();
    assert_eq!(report.status, UnitStatus::Downloaded);
    assert_eq!(std::fs::read(&report.path).unwrap(), ciphertext);
    assert_eq!(report.key_resolutions, 0);
    assert!(http.requests_to("unit.key").is_empty());
}

#[tokio::test]
async fn test_max_segments_caps_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 10);
    let http = Arc::new(http);

    let pipeline = HlsPipeline::new(config(dir.path()).with_max_segments(Some(4)), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Sample"), &capture_with_media(10))
        .await
        .unwrap();

    let expected: Vec<u8> = (0..4).flat_map(payload).collect();
    assert_eq!(report.status, UnitStatus::Downloaded);
    assert_eq!(report.segments_written, 4);
    assert_eq!(std::fs::read(&report.path).unwrap(), expected);
    assert_eq!(http.request_count(), 4);
    assert!(http.requests_to("seg004.ts").is_empty());
}

#[tokio::test]
async fn test_decryption_failure_aborts_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    serve_segments(&mut http, 3);
    // not a whole number of AES blocks
    http.serve(url("seg001.ts").as_str(), 200, &b"truncated"[..]);
    let http = Arc::new(http);

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let err = pipeline
        .run_unit(&UnitSpec::new("Corrupt"), &capture_with_media(3))
        .await
        .unwrap_err();

    assert!(matches!(err, HlsError::DecryptionFailed { segment: 1, .. }));
    assert!(http.requests_to("seg002.ts").is_empty());
    assert!(!dir.path().join("Corrupt.ts").exists());
    assert!(!dir.path().join("Corrupt.ts.part").exists());
}

#[tokio::test]
async fn test_all_segments_failing_fails_the_unit() {
    let dir = tempfile::tempdir().unwrap();
    // no segment is served, every fetch is a 404
    let http = Arc::new(FakeHttp::default());

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let err = pipeline
        .run_unit(&UnitSpec::new("Empty"), &capture_with_media(3))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HlsError::SegmentFetchFailed { segment: 0, ref reason } if reason.contains("all 3 segments failed")
    ));
    assert_eq!(http.requests_to(".ts").len(), 3);
    assert!(!dir.path().join("Empty.ts").exists());
    assert!(!dir.path().join("Empty.ts.part").exists());
}

#[tokio::test]
async fn test_byte_range_playlist_fetches_each_range_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = FakeHttp::default();
    // one clear resource served whole; the ranges select its parts
    http.serve(url("lecture.ts").as_str(), 200, &b"AAAABBBBBBCC"[..]);
    let http = Arc::new(http);

    let log = MemoryNetworkLog::new();
    log.record(CapturedExchange::new(
        url("index.m3u8"),
        200,
        "#EXTM3U\n#EXT-X-VERSION:4\n#EXT-X-TARGETDURATION:4\n\
         #EXTINF:4.0,\n#EXT-X-BYTERANGE:4@0\nlecture.ts\n\
         #EXTINF:4.0,\n#EXT-X-BYTERANGE:6\nlecture.ts\n\
         #EXTINF:2.0,\n#EXT-X-BYTERANGE:2\nlecture.ts\n#EXT-X-ENDLIST\n",
    ));

    let pipeline = HlsPipeline::new(config(dir.path()), http.clone());
    let report = pipeline
        .run_unit(&UnitSpec::new("Ranged"), &log)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&report.path).unwrap(), b"AAAABBBBBBCC");
    let ranges: Vec<_> = http
        .requests_to("lecture.ts")
        .iter()
        .map(|(_, headers)| headers.get(reqwest::header::RANGE).unwrap().clone())
        .collect();
    assert_eq!(ranges, vec!["bytes=0-3", "bytes=4-9", "bytes=10-11"]);
}
