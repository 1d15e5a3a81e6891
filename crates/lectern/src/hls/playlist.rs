// HLS playlist model and parser. Raw bytes are screened for DRM and normalised
// line by line, then handed to m3u8-rs; its output is flattened into
// `PlaylistLine`s from which the master or media view is built.

use std::borrow::Cow;

use memchr::memmem;
use url::Url;

use crate::hls::HlsError;
use crate::hls::policy;

const DRM_MARKERS: &[&[u8]] = &[b"skd://", b"METHOD=SAMPLE-AES"];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Encryption method named by `#EXT-X-KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128,
    SampleAes(String),
    Other(String),
}

impl KeyMethod {
    pub fn parse(value: &str) -> Self {
        let upper = value.trim().to_ascii_uppercase();
        match upper.as_str() {
            "NONE" => KeyMethod::None,
            "AES-128" => KeyMethod::Aes128,
            m if m.starts_with("SAMPLE-AES") => KeyMethod::SampleAes(upper),
            _ => KeyMethod::Other(upper),
        }
    }
}

impl From<&m3u8_rs::KeyMethod> for KeyMethod {
    fn from(method: &m3u8_rs::KeyMethod) -> Self {
        match method {
            m3u8_rs::KeyMethod::None => KeyMethod::None,
            m3u8_rs::KeyMethod::AES128 => KeyMethod::Aes128,
            m3u8_rs::KeyMethod::SampleAES => KeyMethod::SampleAes("SAMPLE-AES".to_string()),
            m3u8_rs::KeyMethod::Other(other) => KeyMethod::parse(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDirective {
    pub method: KeyMethod,
    pub uri: Option<String>,
    pub iv: Option<[u8; 16]>,
}

impl TryFrom<&m3u8_rs::Key> for KeyDirective {
    type Error = HlsError;

    fn try_from(key: &m3u8_rs::Key) -> Result<Self, Self::Error> {
        Ok(KeyDirective {
            method: KeyMethod::from(&key.method),
            uri: key.uri.clone(),
            iv: key.iv.as_deref().map(parse_iv).transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub bandwidth: Option<u64>,
}

/// One meaningful playlist line.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistLine {
    /// Any tag the model does not interpret
    Tag(String),
    KeyDirective(KeyDirective),
    StreamInfo(StreamInfo),
    SegmentDuration(f64),
    MediaSequence(u64),
    /// `#EXT-X-BYTERANGE`; a missing offset continues the previous sub-range
    ByteRange { length: u64, offset: Option<u64> },
    Uri(String),
}

/// Absolute byte sub-range of a segment resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

impl ByteSpan {
    /// First byte past the span.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Value for an HTTP `Range` request header (inclusive bounds).
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end().saturating_sub(1))
    }
}

/// A segment in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    /// Zero-based position in the output; the only ordering key
    pub index: u64,
    pub uri: Url,
    pub duration: f64,
    /// Key that applies to this segment, if encrypted
    pub key_uri: Option<Url>,
    pub iv: Option<[u8; 16]>,
    pub byte_range: Option<ByteSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub url: Url,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
}

impl MediaPlaylist {
    /// Sum of all `#EXTINF` durations in seconds.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn is_encrypted(&self) -> bool {
        self.segments.iter().any(|s| s.key_uri.is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantRef {
    pub uri: Url,
    pub bandwidth: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterPlaylist {
    pub url: Url,
    /// Program renditions in playlist order, non-program tracks removed
    pub variants: Vec<VariantRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

/// Fails with `UnsupportedDrm` when the bytes carry a DRM key system or a
/// sample-based encryption marker.
pub fn reject_drm(bytes: &[u8]) -> Result<(), HlsError> {
    for marker in DRM_MARKERS {
        if memmem::find(bytes, marker).is_some() {
            return Err(HlsError::UnsupportedDrm(format!(
                "playlist contains {}",
                String::from_utf8_lossy(marker)
            )));
        }
    }
    Ok(())
}

/// Parses raw playlist bytes fetched from `url`.
pub fn parse_playlist(bytes: &[u8], url: &Url) -> Result<Playlist, HlsError> {
    reject_drm(bytes)?;
    let text = normalize(bytes);
    if is_media_playlist(&text) {
        let parsed = m3u8_rs::parse_media_playlist_res(text.as_bytes()).map_err(|e| {
            HlsError::Playlist(format!("Failed to parse media playlist {url}: {e}"))
        })?;
        build_media(&media_lines(&parsed)?, url).map(Playlist::Media)
    } else {
        let parsed = m3u8_rs::parse_master_playlist_res(text.as_bytes()).map_err(|e| {
            HlsError::Playlist(format!("Failed to parse master playlist {url}: {e}"))
        })?;
        build_master(&master_lines(&parsed), url).map(Playlist::Master)
    }
}

/// Parses bytes that must describe a media playlist.
pub fn parse_media_playlist(bytes: &[u8], url: &Url) -> Result<MediaPlaylist, HlsError> {
    match parse_playlist(bytes, url)? {
        Playlist::Media(media) => Ok(media),
        Playlist::Master(_) => Err(HlsError::Playlist(format!(
            "Expected media playlist, got master for {url}"
        ))),
    }
}

/// A media playlist references at least one transport stream segment. Master
/// playlists never carry `#EXTINF`, so that counts as well.
pub fn is_media_playlist(text: &str) -> bool {
    text.lines().any(|line| {
        line.starts_with("#EXTINF") || (!line.starts_with('#') && is_transport_stream_uri(line))
    })
}

fn is_transport_stream_uri(uri: &str) -> bool {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    uri[..end].to_ascii_lowercase().ends_with(".ts")
}

/// Drops blank lines, trims each line and rejoins with `\n`.
pub fn normalize(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut text = String::with_capacity(bytes.len());
    for raw in bytes.split(|b| *b == b'\n') {
        let raw = raw.trim_ascii();
        if raw.is_empty() {
            continue;
        }
        text.push_str(&line_text(raw));
        text.push('\n');
    }
    text
}

/// Valid UTF-8 is used literally; otherwise runs of non-ASCII bytes are
/// percent-encoded so the line is still usable as a URI.
fn line_text(raw: &[u8]) -> Cow<'_, str> {
    if let Ok(text) = std::str::from_utf8(raw) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(raw.len() * 3);
    let mut start = 0;
    while start < raw.len() {
        if raw[start].is_ascii() {
            out.push(raw[start] as char);
            start += 1;
            continue;
        }
        let end = raw[start..]
            .iter()
            .position(|b| b.is_ascii())
            .map_or(raw.len(), |offset| start + offset);
        out.push_str(&urlencoding::encode_binary(&raw[start..end]));
        start = end;
    }
    Cow::Owned(out)
}

/// m3u8-rs attaches a key only to the segment right after `#EXT-X-KEY`; the
/// flattened lines keep that position so the key context can be carried.
fn media_lines(parsed: &m3u8_rs::MediaPlaylist) -> Result<Vec<PlaylistLine>, HlsError> {
    let mut lines = vec![PlaylistLine::MediaSequence(parsed.media_sequence)];
    lines.extend(parsed.unknown_tags.iter().map(tag_line));
    for segment in &parsed.segments {
        lines.extend(segment.unknown_tags.iter().map(tag_line));
        if let Some(key) = &segment.key {
            lines.push(PlaylistLine::KeyDirective(KeyDirective::try_from(key)?));
        }
        if let Some(range) = &segment.byte_range {
            lines.push(PlaylistLine::ByteRange {
                length: range.length,
                offset: range.offset,
            });
        }
        lines.push(PlaylistLine::SegmentDuration(f64::from(segment.duration)));
        lines.push(PlaylistLine::Uri(segment.uri.clone()));
    }
    Ok(lines)
}

fn tag_line(tag: &m3u8_rs::ExtTag) -> PlaylistLine {
    match &tag.rest {
        Some(rest) => PlaylistLine::Tag(format!("#EXT{}:{rest}", tag.tag)),
        None => PlaylistLine::Tag(format!("#EXT{}", tag.tag)),
    }
}

fn master_lines(parsed: &m3u8_rs::MasterPlaylist) -> Vec<PlaylistLine> {
    let mut lines = Vec::with_capacity(parsed.variants.len() * 2);
    for variant in parsed.variants.iter().filter(|v| !v.is_i_frame) {
        lines.push(PlaylistLine::StreamInfo(StreamInfo {
            bandwidth: Some(variant.bandwidth),
        }));
        lines.push(PlaylistLine::Uri(variant.uri.clone()));
    }
    lines
}

/// Parses a hex IV, with or without a `0x` prefix.
pub fn parse_iv(value: &str) -> Result<[u8; 16], HlsError> {
    let hex_str = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let mut iv = [0u8; 16];
    hex::decode_to_slice(hex_str, &mut iv)
        .map_err(|e| HlsError::Playlist(format!("Failed to parse IV '{value}': {e}")))?;
    Ok(iv)
}

/// Absolute URIs are used as-is, relative ones resolve against the playlist.
pub fn resolve_uri(base: &Url, uri: &str) -> Result<Url, HlsError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Url::parse(uri)
            .map_err(|e| HlsError::Playlist(format!("Invalid URI {uri}: {e}")));
    }
    base.join(uri).map_err(|e| {
        HlsError::Playlist(format!("Could not join base URL {base} with URI {uri}: {e}"))
    })
}

fn build_master(lines: &[PlaylistLine], url: &Url) -> Result<MasterPlaylist, HlsError> {
    let mut variants = Vec::new();
    let mut pending: Option<&StreamInfo> = None;
    for line in lines {
        match line {
            PlaylistLine::StreamInfo(info) => pending = Some(info),
            PlaylistLine::Uri(uri) => {
                let Some(info) = pending.take() else {
                    continue;
                };
                if policy::is_non_program_track(uri) {
                    tracing::debug!(uri = %uri, "Skipping non-program track");
                    continue;
                }
                variants.push(VariantRef {
                    uri: resolve_uri(url, uri)?,
                    bandwidth: info.bandwidth,
                });
            }
            _ => {}
        }
    }
    Ok(MasterPlaylist {
        url: url.clone(),
        variants,
    })
}

fn build_media(lines: &[PlaylistLine], url: &Url) -> Result<MediaPlaylist, HlsError> {
    let mut segments: Vec<MediaSegment> = Vec::new();
    let mut media_sequence = 0;
    let mut current_key: Option<(Url, Option<[u8; 16]>)> = None;
    let mut pending_duration: Option<f64> = None;
    let mut pending_range: Option<(u64, Option<u64>)> = None;

    for line in lines {
        match line {
            PlaylistLine::MediaSequence(seq) => media_sequence = *seq,
            PlaylistLine::SegmentDuration(secs) => pending_duration = Some(*secs),
            PlaylistLine::ByteRange { length, offset } => {
                if *length == 0 {
                    return Err(HlsError::Playlist(
                        "#EXT-X-BYTERANGE with zero length".to_string(),
                    ));
                }
                pending_range = Some((*length, *offset));
            }
            PlaylistLine::KeyDirective(key) => {
                current_key = match &key.method {
                    KeyMethod::None => None,
                    KeyMethod::Aes128 => {
                        let uri = key.uri.as_deref().ok_or_else(|| {
                            HlsError::Playlist("AES-128 #EXT-X-KEY without URI".to_string())
                        })?;
                        Some((resolve_uri(url, uri)?, key.iv))
                    }
                    KeyMethod::SampleAes(method) => {
                        return Err(HlsError::UnsupportedDrm(method.clone()));
                    }
                    KeyMethod::Other(method) => {
                        return Err(HlsError::UnsupportedEncryption(method.clone()));
                    }
                };
            }
            PlaylistLine::Uri(uri) => {
                let uri = resolve_uri(url, uri)?;
                let (key_uri, iv) = match &current_key {
                    Some((key_uri, iv)) => (Some(key_uri.clone()), *iv),
                    None => (None, None),
                };
                let byte_range = pending_range.take().map(|(length, offset)| {
                    // without an offset the range follows the previous
                    // sub-range of the same resource
                    let offset = offset.unwrap_or_else(|| match segments.last() {
                        Some(prev) if prev.uri == uri => {
                            prev.byte_range.map_or(0, |span| span.end())
                        }
                        _ => 0,
                    });
                    ByteSpan { offset, length }
                });
                segments.push(MediaSegment {
                    index: segments.len() as u64,
                    uri,
                    duration: pending_duration.take().unwrap_or(0.0),
                    key_uri,
                    iv,
                    byte_range,
                });
            }
            PlaylistLine::StreamInfo(_) | PlaylistLine::Tag(_) => {}
        }
    }

    Ok(MediaPlaylist {
        url: url.clone(),
        media_sequence,
        segments,
    })
}
