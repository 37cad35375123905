//! Stream reader stage
//!
//! Pulls transactions from a [`TransactionSource`] in stream order, cuts them
//! into fixed-size chunks and publishes each chunk whole onto the bounded
//! hand-off queue. A full queue suspends the reader. The stream always ends
//! with an explicit [`HandOff::End`] message so the join stage can tell "no
//! chunk yet" apart from "no chunk ever again".

use async_trait::async_trait;
use chrono::NaiveDateTime;
use meshjoin_common::types::{Chunk, Transaction};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::metrics::PipelineMetrics;

/// Ordered, chunkable read over the transaction stream
#[async_trait]
pub trait TransactionSource: Send {
    /// Return up to `max` transactions in ascending `order_date` order.
    ///
    /// An empty batch means the source is exhausted.
    async fn next_batch(&mut self, max: usize) -> Result<Vec<Transaction>>;
}

/// Transactions held in memory
#[derive(Debug, Default)]
pub struct VecTransactionSource {
    rows: VecDeque<Transaction>,
}

impl VecTransactionSource {
    pub fn new(rows: Vec<Transaction>) -> Self {
        Self { rows: rows.into() }
    }
}

#[async_trait]
impl TransactionSource for VecTransactionSource {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<Transaction>> {
        let take = max.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }
}

/// Why the reader stopped publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOfStream {
    /// The source returned an empty batch
    Exhausted,
    /// The source failed; everything read before the failure was published
    SourceFailed(String),
    /// A stop was requested
    Stopped,
}

/// Upper bound on rows reserved ahead of time for one chunk. Larger chunks
/// grow on demand.
pub(crate) const MAX_PREALLOCATED_ROWS: usize = 4096;

/// Message carried by the hand-off queue
#[derive(Debug)]
pub enum HandOff {
    Chunk(Chunk<Transaction>),
    End(EndOfStream),
}

/// Resolves once a stop has been requested. Never resolves if the
/// controlling sender is gone without having requested one.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let closed = stop.wait_for(|stopped| *stopped).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Reader stage worker
pub struct StreamReader {
    source: Box<dyn TransactionSource>,
    chunk_size: usize,
    pace: Duration,
    queue: mpsc::Sender<HandOff>,
    stop: watch::Receiver<bool>,
    metrics: Arc<PipelineMetrics>,
    next_sequence: u64,
    last_order_date: Option<NaiveDateTime>,
}

impl StreamReader {
    pub fn new(
        source: Box<dyn TransactionSource>,
        config: &PipelineConfig,
        queue: mpsc::Sender<HandOff>,
        stop: watch::Receiver<bool>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            source,
            chunk_size: config.chunk_size.max(1),
            pace: config.pace_interval(),
            queue,
            stop,
            metrics,
            next_sequence: 0,
            last_order_date: None,
        }
    }

    /// Read until the source is exhausted, fails, or a stop is requested,
    /// then publish the end-of-stream marker.
    pub async fn run(mut self) -> EndOfStream {
        let end = self.read_loop().await;

        info!(
            chunks = self.next_sequence,
            reason = ?end,
            "Stream reader finished"
        );

        if self.queue.send(HandOff::End(end.clone())).await.is_err() {
            warn!("Join stage is gone, end-of-stream not delivered");
        }

        end
    }

    async fn read_loop(&mut self) -> EndOfStream {
        let mut pending: Vec<Transaction> = Vec::with_capacity(self.reserve());

        loop {
            if *self.stop.borrow() {
                self.discard(pending.len());
                return EndOfStream::Stopped;
            }

            let wanted = self.chunk_size - pending.len();
            let batch = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => {
                    self.discard(pending.len());
                    return EndOfStream::Stopped;
                }
                batch = self.source.next_batch(wanted) => batch,
            };

            let rows = match batch {
                Ok(rows) => rows,
                Err(e) => {
                    error!(error = %e, "Transaction source failed, ending stream");
                    if !pending.is_empty() && !self.publish(std::mem::take(&mut pending)).await {
                        return EndOfStream::Stopped;
                    }
                    return EndOfStream::SourceFailed(e.to_string());
                }
            };

            if rows.is_empty() {
                if !pending.is_empty() && !self.publish(std::mem::take(&mut pending)).await {
                    return EndOfStream::Stopped;
                }
                return EndOfStream::Exhausted;
            }

            PipelineMetrics::add(&self.metrics.transactions_read, rows.len());

            let mut rows = rows.into_iter();
            while let Some(transaction) = rows.next() {
                self.check_order(&transaction);
                pending.push(transaction);

                if pending.len() < self.chunk_size {
                    continue;
                }

                let full = std::mem::replace(&mut pending, Vec::with_capacity(self.reserve()));
                if !self.publish(full).await {
                    return EndOfStream::Stopped;
                }

                if !self.pace().await {
                    self.discard(rows.len());
                    return EndOfStream::Stopped;
                }
            }
        }
    }

    /// Publish one chunk. Returns false if the join stage has gone away.
    async fn publish(&mut self, records: Vec<Transaction>) -> bool {
        let chunk = Chunk::new(self.next_sequence, records);
        let size = chunk.len();

        if self.queue.send(HandOff::Chunk(chunk)).await.is_err() {
            warn!(sequence = self.next_sequence, "Join stage is gone, stopping reader");
            self.discard(size);
            return false;
        }

        debug!(sequence = self.next_sequence, records = size, "Chunk published");
        PipelineMetrics::add(&self.metrics.chunks_published, 1);
        self.next_sequence += 1;
        true
    }

    /// Pause between chunks. Returns false if a stop arrived meanwhile.
    async fn pace(&mut self) -> bool {
        if self.pace.is_zero() {
            return !*self.stop.borrow();
        }

        tokio::select! {
            biased;
            _ = stop_requested(&mut self.stop) => false,
            _ = tokio::time::sleep(self.pace) => true,
        }
    }

    fn reserve(&self) -> usize {
        self.chunk_size.min(MAX_PREALLOCATED_ROWS)
    }

    fn check_order(&mut self, transaction: &Transaction) {
        if let Some(previous) = self.last_order_date {
            if transaction.order_date < previous {
                warn!(
                    order_id = transaction.order_id,
                    order_date = %transaction.order_date,
                    previous = %previous,
                    "Transaction arrived out of order, forwarding unchanged"
                );
                PipelineMetrics::add(&self.metrics.out_of_order, 1);
            }
        }
        self.last_order_date = Some(transaction.order_date);
    }

    fn discard(&self, count: usize) {
        if count > 0 {
            warn!(transactions = count, "Discarding partially accumulated chunk on stop");
            PipelineMetrics::add(&self.metrics.transactions_discarded, count);
        }
    }
}
