use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lectern_engine::hls::{ProgressEvent, UnitStage};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

fn segment_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} segments")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// One bar per unit, keyed by the unit's base name.
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: true,
        }
    }

    pub fn handle_event(&self, event: &ProgressEvent) {
        if self.disabled {
            return;
        }

        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            ProgressEvent::SegmentsEnumerated { unit, total } => {
                let bar = self.multi.add(ProgressBar::new(*total as u64));
                bar.set_style(segment_style());
                bar.set_message(unit.clone());
                bar.enable_steady_tick(Duration::from_millis(500));
                bars.insert(unit.clone(), bar);
            }
            ProgressEvent::SegmentWritten { unit, .. } | ProgressEvent::SegmentDropped { unit, .. } => {
                if let Some(bar) = bars.get(unit) {
                    bar.inc(1);
                }
            }
            ProgressEvent::Stage { unit, stage } => match stage {
                UnitStage::Done => {
                    if let Some(bar) = bars.remove(unit) {
                        bar.finish_with_message(format!("Finished {unit}"));
                    }
                }
                UnitStage::Failed => {
                    if let Some(bar) = bars.remove(unit) {
                        bar.abandon_with_message(format!("Failed {unit}"));
                    }
                }
                stage => {
                    if let Some(bar) = bars.get(unit) {
                        bar.set_message(format!("{unit} ({stage})"));
                    }
                }
            },
        }
    }
}
