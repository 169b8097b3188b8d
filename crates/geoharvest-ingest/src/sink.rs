//! Append-only JSONL record stream
//!
//! One target owns one stream. The line count of the stream is the resume
//! position of the target, so lines are only ever appended, one whole page
//! per write.

use geoharvest_common::{HarvestRecord, SkipSidecar};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::error::Result;

/// Count the non-empty lines of a record stream
///
/// A missing file counts as zero. Blank lines are ignored.
pub async fn count_records(path: &Path) -> Result<u64> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).split(b'\n');
    let mut count = 0u64;
    while let Some(line) = lines.next_segment().await? {
        if line.iter().any(|b| !b.is_ascii_whitespace()) {
            count += 1;
        }
    }

    Ok(count)
}

/// Whether a non-empty file lacks a final newline
async fn ends_mid_line(path: &Path) -> Result<bool> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }

    file.seek(std::io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

/// Writer appending normalized records to a target's stream
#[derive(Debug)]
pub struct RecordSink {
    path: PathBuf,
    file: File,
    appended: u64,
}

impl RecordSink {
    /// Open `path` for appending, creating it and its parent directory
    ///
    /// An interrupted earlier run may have left a line without its newline;
    /// a newline is written first so the next record starts on its own line.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let repair = ends_mid_line(&path).await?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;

        if repair {
            warn!(path = %path.display(), "Record stream ends mid-line, starting a new line");
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        Ok(Self {
            path,
            file,
            appended: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this sink
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Append one page of records with a single write, then flush
    pub async fn append(&mut self, records: &[HarvestRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::with_capacity(records.len() * 512);
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        self.file.write_all(&buf).await?;
        self.file.flush().await?;

        let count = records.len() as u64;
        self.appended += count;
        debug!(path = %self.path.display(), count, total = self.appended, "Appended records");

        Ok(count)
    }
}

/// Path of the skip sidecar belonging to a record stream
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".skipped.json");
    PathBuf::from(name)
}

/// Write a skip sidecar, replacing any earlier one
pub async fn write_sidecar(path: &Path, sidecar: &SkipSidecar) -> Result<()> {
    fs::write(path, sidecar.to_json()?).await?;
    Ok(())
}
