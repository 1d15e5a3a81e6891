use clap::Parser;
use lectern_engine::hls::IvPolicy;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "HLS lecture downloader",
    long_about = "Rebuilds lecture videos from recorded browser traffic.\n\
                  \n\
                  Each input is a HAR file exported from the browser's network panel while\n\
                  the lecture page was playing. The captured playlist is resolved to the\n\
                  longest program rendition, its AES-128 segments are decrypted with keys\n\
                  found in the capture (or re-fetched with the captured headers), and the\n\
                  result is written as one transport stream, optionally remuxed with ffmpeg."
)]
pub struct CliArgs {
    /// HAR capture(s), one unit each
    #[arg(
        required_unless_present = "units",
        conflicts_with = "units",
        help = "HAR file(s) recorded while the lecture played; each file is one unit"
    )]
    pub input: Vec<PathBuf>,

    /// JSON batch file describing units
    #[arg(
        short = 'u',
        long,
        help = "JSON file listing units: [{\"index\": 1, \"title\": \"Intro\", \"group\": \"Course\", \"har\": \"intro.har\"}]"
    )]
    pub units: Option<PathBuf>,

    /// Output directory
    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory where downloaded units are saved"
    )]
    pub output_dir: PathBuf,

    /// Unit title for a single input
    #[arg(
        short = 't',
        long,
        help = "Title of the unit (single input only, defaults to the HAR file name)"
    )]
    pub title: Option<String>,

    /// Unit index for a single input
    #[arg(long, help = "Numeric index prefixed to the file name (single input only)")]
    pub index: Option<u32>,

    /// Group title used as a sub-directory
    #[arg(short = 'g', long, help = "Lecture/course title, used as a sub-directory")]
    pub group: Option<String>,

    /// First unit of the batch to process
    #[arg(long, help = "Zero-based index of the first unit to process")]
    pub start: Option<usize>,

    /// Last unit of the batch to process
    #[arg(long, help = "Zero-based index of the last unit to process (clamped)")]
    pub end: Option<usize>,

    /// Overwrite existing outputs
    #[arg(short, long, help = "Re-download units whose output already exists")]
    pub force: bool,

    #[arg(
        long,
        help = "Write segments as fetched without decrypting (diagnostics only)"
    )]
    pub keep_encrypted: bool,

    #[arg(long, help = "Only process the first N segments of each unit")]
    pub max_segments: Option<usize>,

    /// Skip the ffmpeg remux
    #[arg(long, help = "Keep the raw transport stream instead of remuxing")]
    pub no_remux: bool,

    #[arg(long, default_value = "ffmpeg", help = "Path to the ffmpeg executable")]
    pub ffmpeg: PathBuf,

    #[arg(
        long,
        default_value = "mp4",
        help = "Container extension of the remuxed output"
    )]
    pub format: String,

    #[arg(
        long,
        help = "Substring the entry playlist URL must contain besides .m3u8"
    )]
    pub playlist_filter: Option<String>,

    /// How long to wait for a key to show up in the capture
    #[arg(
        long,
        default_value = "10s",
        help = "Maximum wait for a key request in the capture, with optional unit (s, m). Examples: \"10s\", \"500ms\""
    )]
    pub key_wait: String,

    #[arg(
        long,
        value_enum,
        default_value_t = IvPolicy::SegmentIndex,
        help = "IV used when a key directive carries none"
    )]
    pub iv_policy: IvPolicy,

    /// Cookie header of the viewing session
    #[arg(
        long,
        help = "Cookie string of the logged-in session, used as a last resort for key fetches"
    )]
    pub session_cookie: Option<String>,

    #[arg(long, help = "Referer sent with session key fetches")]
    pub session_referer: Option<String>,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "0",
        help = "Overall timeout in seconds for HTTP requests"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Read timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: u64,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for downloads (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    /// Proxy type (http, https, socks5)
    #[arg(
        long,
        default_value = "http",
        help = "Proxy type (http, https, socks5)",
        value_parser = ["http", "https", "socks5"]
    )]
    pub proxy_type: String,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Use system proxy settings for downloads
    #[arg(
        long,
        help = "Use system proxy settings for downloads if no explicit proxy is configured"
    )]
    pub use_system_proxy: bool,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Show progress bars for operations
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show a progress bar per unit"
    )]
    pub show_progress: bool,
}
