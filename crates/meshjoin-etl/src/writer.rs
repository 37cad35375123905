//! Sink writer stage
//!
//! Drains enriched batches in the order the join stage produced them and
//! hands each one to the [`WarehouseSink`]. Finishes when the join stage drops
//! its end of the batch queue.

use meshjoin_common::types::{Chunk, EnrichedRecord};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::SinkErrorPolicy;
use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::sink::WarehouseSink;

pub struct SinkWriter {
    sink: Arc<dyn WarehouseSink>,
    batches: mpsc::Receiver<Chunk<EnrichedRecord>>,
    policy: SinkErrorPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl SinkWriter {
    pub fn new(
        sink: Arc<dyn WarehouseSink>,
        batches: mpsc::Receiver<Chunk<EnrichedRecord>>,
        policy: SinkErrorPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            batches,
            policy,
            metrics,
        }
    }

    /// Write every batch until the queue closes.
    ///
    /// Under [`SinkErrorPolicy::Skip`] a rejected batch is logged, counted
    /// and skipped. Under [`SinkErrorPolicy::Abort`] it ends the stage with
    /// [`PipelineError::SinkWrite`].
    pub async fn run(mut self) -> Result<()> {
        while let Some(batch) = self.batches.recv().await {
            let records = batch.len();

            match self.sink.write_batch(&batch.records).await {
                Ok(()) => {
                    debug!(sequence = batch.sequence, records, "Batch written");
                    PipelineMetrics::add(&self.metrics.batches_written, 1);
                    PipelineMetrics::add(&self.metrics.records_written, records);
                }
                Err(e) => {
                    error!(
                        sequence = batch.sequence,
                        records,
                        policy = %self.policy,
                        error = %e,
                        "Warehouse rejected batch"
                    );
                    PipelineMetrics::add(&self.metrics.batches_failed, 1);
                    PipelineMetrics::add(&self.metrics.records_failed, records);

                    if self.policy == SinkErrorPolicy::Abort {
                        return Err(PipelineError::SinkWrite {
                            sequence: batch.sequence,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        let metrics = self.metrics.snapshot();
        info!(
            batches = metrics.batches_written,
            records = metrics.records_written,
            failed_batches = metrics.batches_failed,
            "Sink writer finished"
        );
        Ok(())
    }
}
