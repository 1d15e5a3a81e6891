use lectern_engine::hls::HlsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] lectern_engine::DownloadError),

    #[error("HLS error: {0}")]
    Hls(#[from] HlsError),

    #[error("Invalid units file: {0}")]
    UnitsFile(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("{failed} of {total} units failed")]
    UnitsFailed { failed: usize, total: usize },
}
