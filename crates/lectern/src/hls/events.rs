use std::fmt;
use std::sync::Arc;

/// Stages a unit moves through. `Failed` is reachable from every stage
/// before `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStage {
    Idle,
    ResolvingPlaylist,
    SelectingRendition,
    EnumeratingSegments,
    ResolvingKeys,
    FetchingAndDecrypting,
    Assembling,
    Remuxing,
    Done,
    Failed,
}

impl fmt::Display for UnitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitStage::Idle => "idle",
            UnitStage::ResolvingPlaylist => "resolving playlist",
            UnitStage::SelectingRendition => "selecting rendition",
            UnitStage::EnumeratingSegments => "enumerating segments",
            UnitStage::ResolvingKeys => "resolving keys",
            UnitStage::FetchingAndDecrypting => "fetching segments",
            UnitStage::Assembling => "assembling",
            UnitStage::Remuxing => "remuxing",
            UnitStage::Done => "done",
            UnitStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Stage {
        unit: String,
        stage: UnitStage,
    },
    SegmentsEnumerated {
        unit: String,
        total: usize,
    },
    SegmentWritten {
        unit: String,
        index: u64,
        bytes: usize,
    },
    SegmentDropped {
        unit: String,
        index: u64,
    },
}

pub type OnProgress = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;
