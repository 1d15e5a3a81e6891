// Output assembly: segments are appended in order to a `.part` file which is
// renamed onto the raw artifact only once every segment has been handled.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::hls::HlsError;

pub struct AssemblyWriter {
    target: PathBuf,
    part_path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    segments_written: usize,
}

/// `<path>.part` next to the target.
pub fn part_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

impl AssemblyWriter {
    /// Creates (truncating) the `.part` file for `target`, creating parent
    /// directories as needed.
    pub async fn create(target: impl Into<PathBuf>) -> Result<Self, HlsError> {
        let target = target.into();
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let part_path = part_path_for(&target);
        let file = File::create(&part_path).await?;
        debug!(path = %part_path.display(), "Opened part file");
        Ok(Self {
            target,
            part_path,
            writer: BufWriter::new(file),
            bytes_written: 0,
            segments_written: 0,
        })
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<(), HlsError> {
        self.writer.write_all(data).await?;
        self.bytes_written += data.len() as u64;
        self.segments_written += 1;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    /// Flushes and moves the `.part` file onto the target path.
    pub async fn finish(mut self) -> Result<PathBuf, HlsError> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        drop(self.writer);
        fs::rename(&self.part_path, &self.target).await?;
        debug!(
            path = %self.target.display(),
            bytes = self.bytes_written,
            "Finalized output"
        );
        Ok(self.target)
    }

    /// Removes the `.part` file; nothing is left at the target path.
    pub async fn abort(self) {
        drop(self.writer);
        if let Err(e) = fs::remove_file(&self.part_path).await {
            warn!(path = %self.part_path.display(), "Failed to remove part file: {e}");
        }
    }
}
