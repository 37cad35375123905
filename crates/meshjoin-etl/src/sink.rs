//! Warehouse sink interface
//!
//! A sink receives one enriched chunk at a time and writes it as a single
//! batch: the batch either lands as a whole or fails as a whole. Sinks do not
//! retry; the writer stage decides what a failure means for the run.

use async_trait::async_trait;
use meshjoin_common::types::EnrichedRecord;
use tokio::sync::Mutex;

use crate::error::Result;

/// Batched writer for the warehouse fact table
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Persist `records` as one batch
    async fn write_batch(&self, records: &[EnrichedRecord]) -> Result<()>;
}

/// Sink that keeps every batch in memory, in write order
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<EnrichedRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches in the order they were written
    pub async fn batches(&self) -> Vec<Vec<EnrichedRecord>> {
        self.batches.lock().await.clone()
    }

    /// All written records, flattened in write order
    pub async fn records(&self) -> Vec<EnrichedRecord> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.lock().await.len()
    }
}

#[async_trait]
impl WarehouseSink for MemorySink {
    async fn write_batch(&self, records: &[EnrichedRecord]) -> Result<()> {
        self.batches.lock().await.push(records.to_vec());
        Ok(())
    }
}
