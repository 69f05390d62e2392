//! Skip file and completion log.
//!
//! Both are plain text files holding one batch number per line. A run that
//! appends to its completion log can be resumed by passing that log as the
//! skip file of the next run over the same input.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::types::error::S3BulkDeleteError;

/// Read the batch numbers to skip from `path`.
///
/// Surrounding whitespace is trimmed and blank lines are ignored. Anything that
/// is not a non-negative integer is an error naming the offending line.
pub async fn load_skip_file(path: &Path) -> Result<HashSet<u64>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow!(S3BulkDeleteError::Io(format!(
            "failed to read skip file {}: {e}",
            path.display()
        )))
    })?;

    let skip = parse_batch_numbers(&content).map_err(|message| {
        anyhow!(S3BulkDeleteError::InvalidConfig(format!(
            "{}: {message}",
            path.display()
        )))
    })?;

    debug!(
        skip_file = %path.display(),
        batches = skip.len(),
        "skip file has been loaded."
    );
    Ok(skip)
}

fn parse_batch_numbers(content: &str) -> Result<HashSet<u64>, String> {
    let mut numbers = HashSet::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let number = line
            .parse::<u64>()
            .map_err(|e| format!("line {}: invalid batch number {line:?}: {e}", index + 1))?;
        numbers.insert(number);
    }
    Ok(numbers)
}

/// Append-only record of completed batch numbers.
#[derive(Debug)]
pub struct CompletionLog {
    path: PathBuf,
    file: File,
}

impl CompletionLog {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| {
                anyhow!(S3BulkDeleteError::Io(format!(
                    "failed to open completion log {}: {e}",
                    path.display()
                )))
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one batch number and flush it to the file.
    pub async fn append(&mut self, batch_number: u64) -> Result<()> {
        let line = format!("{batch_number}\n");
        self.file.write_all(line.as_bytes()).await.map_err(|e| self.io_error(e))?;
        self.file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, e: std::io::Error) -> anyhow::Error {
        anyhow!(S3BulkDeleteError::Io(format!(
            "failed to write completion log {}: {e}",
            self.path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
