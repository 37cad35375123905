//! JSON Lines file sinks
//!
//! One JSON object per line. Each batch is serialized in full before the
//! single write, so a serialization error leaves the file untouched.

use async_trait::async_trait;
use meshjoin_common::types::EnrichedRecord;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::dead_letter::{DeadLetterSink, UnmatchedTransaction};
use crate::error::{PipelineError, Result};
use crate::sink::WarehouseSink;

struct JsonLinesFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesFile {
    /// Open for append, creating the file if needed
    async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    async fn append<T: Serialize>(&self, records: &[T]) -> Result<()> {
        let mut buffer = Vec::with_capacity(records.len() * 256);
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let mut file = self.file.lock().await;
        file.write_all(&buffer).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), records = records.len(), "Appended JSON lines");
        Ok(())
    }
}

/// Warehouse sink writing enriched records to a `.jsonl` file
pub struct JsonLinesSink {
    out: JsonLinesFile,
}

impl JsonLinesSink {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: JsonLinesFile::open(path.as_ref()).await?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.out.path
    }
}

#[async_trait]
impl WarehouseSink for JsonLinesSink {
    async fn write_batch(&self, records: &[EnrichedRecord]) -> Result<()> {
        self.out.append(records).await
    }
}

/// Dead-letter sink writing unmatched transactions to a `.jsonl` file
pub struct JsonLinesDeadLetter {
    out: JsonLinesFile,
}

impl JsonLinesDeadLetter {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            out: JsonLinesFile::open(path.as_ref()).await?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.out.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetter {
    async fn write_unmatched(&self, records: &[UnmatchedTransaction]) -> Result<()> {
        self.out
            .append(records)
            .await
            .map_err(|e| PipelineError::DeadLetter(e.to_string()))
    }
}
