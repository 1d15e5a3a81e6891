use std::path::PathBuf;
use std::time::Duration;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Substring the entry playlist URL must contain besides `.m3u8`
    pub playlist_filter: Option<String>,
    pub output_config: OutputConfig,
    pub key_config: KeyConfig,
    pub fetcher_config: FetcherConfig,
    pub remux_config: RemuxConfig,
}

impl PipelineConfig {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_config: OutputConfig {
                dest_dir: dest_dir.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_playlist_filter(mut self, filter: impl Into<String>) -> Self {
        self.playlist_filter = Some(filter.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.output_config.force = force;
        self
    }

    pub fn with_keep_encrypted(mut self, keep: bool) -> Self {
        self.fetcher_config.keep_encrypted = keep;
        self
    }

    pub fn with_max_segments(mut self, max: Option<usize>) -> Self {
        self.fetcher_config.max_segments = max;
        self
    }

    pub fn with_remux(mut self, enabled: bool) -> Self {
        self.remux_config.enabled = enabled;
        self
    }

    pub fn with_remux_tool(mut self, tool: impl Into<PathBuf>) -> Self {
        self.remux_config.tool = tool.into();
        self
    }

    pub fn with_target_extension(mut self, ext: impl Into<String>) -> Self {
        self.output_config.target_extension = ext.into();
        self
    }

    pub fn with_capture_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.key_config.capture_wait_timeout = timeout;
        self.key_config.capture_poll_interval = poll_interval;
        self
    }

    pub fn with_iv_policy(mut self, policy: IvPolicy) -> Self {
        self.key_config.iv_policy = policy;
        self
    }
}

// --- Output Configuration ---
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub dest_dir: PathBuf,
    /// Remove existing artifacts instead of skipping the unit
    pub force: bool,
    /// Extension of the remuxed artifact
    pub target_extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::from("."),
            force: false,
            target_extension: "mp4".to_string(),
        }
    }
}

// --- Key Configuration ---
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Upper bound on waiting for a key exchange to show up in the capture log
    pub capture_wait_timeout: Duration,
    pub capture_poll_interval: Duration,
    pub iv_policy: IvPolicy,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            capture_wait_timeout: Duration::from_secs(10),
            capture_poll_interval: Duration::from_millis(250),
            iv_policy: IvPolicy::default(),
        }
    }
}

/// Source of the IV when a key directive carries none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum IvPolicy {
    /// Zero-based position of the segment in the output
    #[default]
    SegmentIndex,
    /// `#EXT-X-MEDIA-SEQUENCE` plus the segment position
    MediaSequence,
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Write ciphertext as fetched and skip key resolution
    pub keep_encrypted: bool,
    pub max_segments: Option<usize>,
    /// Number of failed segments whose body is previewed in the log
    pub preview_count: usize,
    pub preview_len: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            keep_encrypted: false,
            max_segments: None,
            preview_count: 3,
            preview_len: 256,
        }
    }
}

// --- Remux Configuration ---
#[derive(Debug, Clone)]
pub struct RemuxConfig {
    pub enabled: bool,
    pub tool: PathBuf,
}

impl Default for RemuxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool: PathBuf::from("ffmpeg"),
        }
    }
}
