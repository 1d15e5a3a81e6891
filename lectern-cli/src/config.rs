use std::path::{Path, PathBuf};

use lectern_engine::hls::UnitSpec;
use serde::Deserialize;

use crate::error::AppError;

/// One unit of a batch: naming facts plus the HAR recorded for it.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitEntry {
    #[serde(flatten)]
    pub spec: UnitSpec,
    pub har: PathBuf,
}

/// Reads a units file. Relative HAR paths are taken relative to the file.
pub async fn load_units(path: &Path) -> Result<Vec<UnitEntry>, AppError> {
    let bytes = tokio::fs::read(path).await?;
    let mut entries = parse_units(&bytes)?;
    if let Some(base) = path.parent() {
        for entry in &mut entries {
            if entry.har.is_relative() {
                entry.har = base.join(&entry.har);
            }
        }
    }
    Ok(entries)
}

pub fn parse_units(bytes: &[u8]) -> Result<Vec<UnitEntry>, AppError> {
    let mut entries: Vec<UnitEntry> = serde_json::from_slice(bytes)?;
    sort_units(&mut entries);
    Ok(entries)
}

/// Orders units by their effective index; units without one keep their
/// relative order after the indexed ones.
pub fn sort_units(entries: &mut [UnitEntry]) {
    entries.sort_by_key(|e| match e.spec.effective_index() {
        Some(idx) => (0, idx),
        None => (1, 0),
    });
}

/// Unit list for plain HAR inputs.
pub fn units_from_inputs(
    inputs: &[PathBuf],
    title: Option<&str>,
    index: Option<u32>,
    group: Option<&str>,
) -> Result<Vec<UnitEntry>, AppError> {
    if inputs.len() > 1 && (title.is_some() || index.is_some()) {
        return Err(AppError::InvalidInput(
            "--title and --index apply to a single input, use --units for batches".to_string(),
        ));
    }

    let mut entries = inputs
        .iter()
        .map(|har| {
            let title = match title {
                Some(title) => title.to_string(),
                None => har
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            UnitEntry {
                spec: UnitSpec {
                    index,
                    title,
                    group: group.map(str::to_string),
                },
                har: har.clone(),
            }
        })
        .collect::<Vec<_>>();
    sort_units(&mut entries);
    Ok(entries)
}
