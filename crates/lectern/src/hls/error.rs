use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone)]
pub enum HlsError {
    #[error("DRM protected content is not supported: {0}")]
    UnsupportedDrm(String),
    #[error("Unsupported encryption method: {0}")]
    UnsupportedEncryption(String),
    #[error("No playable rendition: {0}")]
    NoPlayableRendition(String),
    #[error("No media playlist found: {0}")]
    NoMediaPlaylistFound(String),
    #[error("Key resolution failed for segment {segment} (key path {key_path})")]
    KeyResolutionFailed { segment: u64, key_path: String },
    #[error("Key for segment {segment} (key path {key_path}) has {len} bytes, expected 16")]
    InvalidKeyLength {
        segment: u64,
        key_path: String,
        len: usize,
    },
    #[error("Decryption failed for segment {segment}: {reason}")]
    DecryptionFailed { segment: u64, reason: String },
    #[error("Segment {segment} fetch failed: {reason}")]
    SegmentFetchFailed { segment: u64, reason: String },
    #[error("Remux failed: {0}")]
    RemuxFailed(String),
    #[error("Playlist error: {0}")]
    Playlist(String),
    #[error("Capture error: {0}")]
    Capture(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
}

impl HlsError {
    /// Whether the error only affects a single segment and the unit can continue.
    pub fn is_segment_local(&self) -> bool {
        matches!(self, HlsError::SegmentFetchFailed { .. })
    }
}

// Manual implementation of From<reqwest::Error> for HlsError
// because of the Arc wrapping.
impl From<reqwest::Error> for HlsError {
    fn from(err: reqwest::Error) -> Self {
        HlsError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for HlsError {
    fn from(err: std::io::Error) -> Self {
        HlsError::Io {
            source: Arc::new(err),
        }
    }
}
