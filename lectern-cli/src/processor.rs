use std::time::Instant;

use lectern_engine::MemoryNetworkLog;
use lectern_engine::hls::{BatchRange, HlsPipeline, RemuxOutcome, UnitReport, UnitStatus};
use tracing::{error, info, warn};

use crate::config::UnitEntry;
use crate::error::AppError;
use crate::utils::{format_bytes, format_duration};

/// Runs the selected units one by one. Each unit's capture is loaded right
/// before it runs and dropped before the next one is read.
pub async fn process_units(
    entries: &[UnitEntry],
    range: Option<BatchRange>,
    pipeline: &HlsPipeline,
) -> Result<(), AppError> {
    let selected = match range {
        Some(range) => &entries[range.clamp(entries.len())],
        None => entries,
    };
    if selected.is_empty() {
        return Err(AppError::InvalidInput("No units selected".to_string()));
    }

    let started = Instant::now();
    let mut failed = 0;
    for (position, entry) in selected.iter().enumerate() {
        let unit = entry.spec.base_name();
        info!(unit = %unit, "Unit {}/{}", position + 1, selected.len());

        let log = match MemoryNetworkLog::from_har_file(&entry.har).await {
            Ok(log) => log,
            Err(e) => {
                error!(unit = %unit, har = %entry.har.display(), "Failed to load capture: {e}");
                failed += 1;
                continue;
            }
        };

        match pipeline.run_unit(&entry.spec, &log).await {
            Ok(report) => log_report(&report),
            Err(e) => {
                failed += 1;
                error!(unit = %unit, "Failed: {e}");
            }
        }
    }

    info!(
        units = selected.len(),
        failed,
        "Batch finished in {}",
        format_duration(started.elapsed())
    );
    if failed > 0 {
        return Err(AppError::UnitsFailed {
            failed,
            total: selected.len(),
        });
    }
    Ok(())
}

fn log_report(report: &UnitReport) {
    let unit = report.spec.base_name();
    match &report.status {
        UnitStatus::AlreadyExists => {
            info!(unit = %unit, path = %report.path.display(), "Already exists, skipped");
            return;
        }
        UnitStatus::Downloaded => {
            info!(
                unit = %unit,
                path = %report.path.display(),
                segments = report.segments_written,
                "Downloaded {}",
                format_bytes(report.bytes_written)
            );
        }
        UnitStatus::Partial { missing } => {
            warn!(
                unit = %unit,
                path = %report.path.display(),
                missing = ?missing,
                "Downloaded {} with {} missing segment(s)",
                format_bytes(report.bytes_written),
                missing.len()
            );
        }
    }
    if let RemuxOutcome::Failed(reason) = &report.remux {
        warn!(unit = %unit, "Remux failed, raw stream kept: {reason}");
    }
}
