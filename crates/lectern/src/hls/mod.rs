// HLS resolution, decryption and assembly

pub mod config;
pub mod decryption;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod keys;
pub mod output;
pub mod pipeline;
pub mod playlist;
pub mod policy;
pub mod remux;
pub mod selector;

// Re-exports for easier access
pub use config::{IvPolicy, PipelineConfig};
pub use error::HlsError;
pub use events::{OnProgress, ProgressEvent, UnitStage};
pub use keys::{KeyCache, KeyReference, KeyResolver, ResolvedKey, UnitSession};
pub use pipeline::{
    BatchEntry, BatchRange, DownloadState, ExistenceCheck, HlsPipeline, UnitJob, UnitReport,
    UnitSpec, UnitStatus,
};
pub use playlist::{MediaPlaylist, MediaSegment, Playlist};
pub use remux::RemuxOutcome;
