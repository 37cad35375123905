//! Run counters shared by the pipeline stages

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the reader, join and writer stages.
///
/// Each stage only increments its own counters; the orchestrator snapshots
/// them into the run report.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub transactions_read: AtomicU64,
    pub chunks_published: AtomicU64,
    /// Transactions that arrived with an `order_date` earlier than their predecessor
    pub out_of_order: AtomicU64,
    /// Transactions accumulated but never published because of a stop request
    pub transactions_discarded: AtomicU64,

    pub chunks_processed: AtomicU64,
    pub records_enriched: AtomicU64,
    pub records_unmatched: AtomicU64,
    pub records_dead_lettered: AtomicU64,

    pub batches_written: AtomicU64,
    pub records_written: AtomicU64,
    pub batches_failed: AtomicU64,
    pub records_failed: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_read: self.transactions_read.load(Ordering::Relaxed),
            chunks_published: self.chunks_published.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            transactions_discarded: self.transactions_discarded.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            records_enriched: self.records_enriched.load(Ordering::Relaxed),
            records_unmatched: self.records_unmatched.load(Ordering::Relaxed),
            records_dead_lettered: self.records_dead_lettered.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transactions_read: u64,
    pub chunks_published: u64,
    pub out_of_order: u64,
    pub transactions_discarded: u64,
    pub chunks_processed: u64,
    pub records_enriched: u64,
    pub records_unmatched: u64,
    pub records_dead_lettered: u64,
    pub batches_written: u64,
    pub records_written: u64,
    pub batches_failed: u64,
    pub records_failed: u64,
}
