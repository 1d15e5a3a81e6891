//! Container remux through an external tool (`ffmpeg` by default).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::hls::HlsError;

/// Result of the optional remux step. A failed remux keeps the raw artifact
/// and does not fail the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemuxOutcome {
    Skipped,
    Remuxed(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Remuxer {
    tool: PathBuf,
}

impl Remuxer {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Remuxes `input` into `output` and deletes `input` on success.
    pub async fn remux(&self, input: &Path, output: &Path) -> RemuxOutcome {
        match self.run(input, output).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(input).await {
                    warn!(path = %input.display(), "Failed to remove raw file after remux: {e}");
                }
                info!(path = %output.display(), "Remuxed");
                RemuxOutcome::Remuxed(output.to_path_buf())
            }
            Err(e) => {
                warn!(path = %input.display(), "Remux failed, keeping raw file: {e}");
                RemuxOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), HlsError> {
        let args = Self::args(input, output);
        debug!(tool = %self.tool.display(), ?args, "Running remux");

        let result = Command::new(&self.tool)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                HlsError::RemuxFailed(format!("failed to start {}: {e}", self.tool.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(HlsError::RemuxFailed(format!(
                "{} exited with code {}: {}",
                self.tool.display(),
                result.status.code().unwrap_or(-1),
                last_line.unwrap_or("unknown error")
            )));
        }
        Ok(())
    }
}
