//! Join stage
//!
//! Loads the master-data cache, then consumes chunks from the hand-off queue
//! one at a time, enriching each transaction with its customer and product.
//! Matched records of one input chunk become one output batch, in input
//! order. Transactions that do not match are handled by the configured
//! [`UnmatchedHandler`].

use meshjoin_common::types::{Chunk, EnrichedRecord, Transaction};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::{MasterDataCache, MasterDataSnapshot};
use crate::config::UnmatchedPolicy;
use crate::dead_letter::{DeadLetterSink, UnmatchedReason, UnmatchedTransaction};
use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::reader::{EndOfStream, HandOff};

/// Result of joining one chunk
#[derive(Debug, Default)]
pub struct Enrichment {
    /// Matched records, in input order
    pub enriched: Vec<EnrichedRecord>,
    pub unmatched: Vec<UnmatchedTransaction>,
}

/// Join every transaction of `chunk` against `snapshot`.
///
/// Output order follows input order. A transaction is matched only if both
/// its customer and its product are known.
pub fn enrich_chunk(snapshot: &MasterDataSnapshot, chunk: Chunk<Transaction>) -> Enrichment {
    let sequence = chunk.sequence;
    let mut enrichment = Enrichment {
        enriched: Vec::with_capacity(chunk.len()),
        unmatched: Vec::new(),
    };

    for transaction in chunk.records {
        let customer = snapshot.customer(transaction.customer_id);
        let product = snapshot.product(transaction.product_id);

        let reason = match (customer, product) {
            (Some(customer), Some(product)) => {
                enrichment
                    .enriched
                    .push(EnrichedRecord::from_parts(&transaction, customer, product));
                continue;
            }
            (None, Some(_)) => UnmatchedReason::UnknownCustomer,
            (Some(_), None) => UnmatchedReason::UnknownProduct,
            (None, None) => UnmatchedReason::UnknownCustomerAndProduct,
        };

        enrichment.unmatched.push(UnmatchedTransaction {
            transaction,
            reason,
            chunk_sequence: sequence,
        });
    }

    enrichment
}

/// What happens to transactions that fail to join
#[derive(Clone)]
pub enum UnmatchedHandler {
    /// Log and count, then forget them
    Drop,
    /// Forward them to a dead-letter sink
    DeadLetter(Arc<dyn DeadLetterSink>),
    /// Abort the run on the first one
    FailFast,
}

impl UnmatchedHandler {
    /// Resolve a configured policy. `DeadLetter` requires a sink.
    pub fn from_policy(
        policy: UnmatchedPolicy,
        dead_letter: Option<Arc<dyn DeadLetterSink>>,
    ) -> Result<Self> {
        match policy {
            UnmatchedPolicy::Drop => Ok(Self::Drop),
            UnmatchedPolicy::FailFast => Ok(Self::FailFast),
            UnmatchedPolicy::DeadLetter => dead_letter.map(Self::DeadLetter).ok_or_else(|| {
                PipelineError::Config(
                    "unmatched policy 'dead-letter' requires a dead-letter sink".to_string(),
                )
            }),
        }
    }

    /// Apply the policy to the unmatched transactions of one chunk
    pub async fn on_unmatched(
        &self,
        unmatched: &[UnmatchedTransaction],
        metrics: &PipelineMetrics,
    ) -> Result<()> {
        if unmatched.is_empty() {
            return Ok(());
        }

        for record in unmatched {
            debug!(
                order_id = record.transaction.order_id,
                customer_id = record.transaction.customer_id,
                product_id = record.transaction.product_id,
                reason = %record.reason,
                "Transaction has no matching master data"
            );
        }

        match self {
            UnmatchedHandler::Drop => {
                debug!(
                    sequence = unmatched[0].chunk_sequence,
                    dropped = unmatched.len(),
                    "Dropping unmatched transactions"
                );
                Ok(())
            }
            UnmatchedHandler::DeadLetter(sink) => {
                match sink.write_unmatched(unmatched).await {
                    Ok(()) => {
                        PipelineMetrics::add(&metrics.records_dead_lettered, unmatched.len());
                    }
                    Err(e) => {
                        error!(
                            sequence = unmatched[0].chunk_sequence,
                            records = unmatched.len(),
                            error = %e,
                            "Dead-letter write failed, unmatched transactions lost"
                        );
                    }
                }
                Ok(())
            }
            UnmatchedHandler::FailFast => {
                let first = &unmatched[0];
                Err(PipelineError::UnmatchedReference {
                    order_id: first.transaction.order_id,
                    reference: first.reason.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for UnmatchedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmatchedHandler::Drop => write!(f, "Drop"),
            UnmatchedHandler::DeadLetter(_) => write!(f, "DeadLetter"),
            UnmatchedHandler::FailFast => write!(f, "FailFast"),
        }
    }
}

/// Join stage worker
pub struct JoinProcessor {
    cache: Arc<MasterDataCache>,
    queue: mpsc::Receiver<HandOff>,
    batches: mpsc::Sender<Chunk<EnrichedRecord>>,
    unmatched: UnmatchedHandler,
    metrics: Arc<PipelineMetrics>,
}

impl JoinProcessor {
    pub fn new(
        cache: Arc<MasterDataCache>,
        queue: mpsc::Receiver<HandOff>,
        batches: mpsc::Sender<Chunk<EnrichedRecord>>,
        unmatched: UnmatchedHandler,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            queue,
            batches,
            unmatched,
            metrics,
        }
    }

    /// Load master data, then process chunks until the end-of-stream marker.
    ///
    /// Returns the reader's end-of-stream reason, or `None` if the queue
    /// closed without one. A cache load failure, a fail-fast policy
    /// violation, or a vanished writer ends the stage with an error.
    pub async fn run(mut self) -> Result<Option<EndOfStream>> {
        let cache = self.cache.clone();
        let snapshot = cache.load().await.map_err(|e| {
            error!(error = %e, "Cannot start join stage without master data");
            e
        })?;

        let mut chunks = 0u64;
        while let Some(message) = self.queue.recv().await {
            match message {
                HandOff::Chunk(chunk) => {
                    self.process(snapshot, chunk).await?;
                    chunks += 1;
                }
                HandOff::End(end) => {
                    info!(chunks, reason = ?end, "Join stage finished");
                    return Ok(Some(end));
                }
            }
        }

        warn!(chunks, "Hand-off queue closed without end-of-stream");
        Ok(None)
    }

    async fn process(
        &mut self,
        snapshot: &MasterDataSnapshot,
        chunk: Chunk<Transaction>,
    ) -> Result<()> {
        let sequence = chunk.sequence;
        let received = chunk.len();
        let Enrichment {
            enriched,
            unmatched,
        } = enrich_chunk(snapshot, chunk);

        PipelineMetrics::add(&self.metrics.chunks_processed, 1);
        PipelineMetrics::add(&self.metrics.records_enriched, enriched.len());
        PipelineMetrics::add(&self.metrics.records_unmatched, unmatched.len());

        self.unmatched.on_unmatched(&unmatched, &self.metrics).await?;

        debug!(
            sequence,
            received,
            enriched = enriched.len(),
            unmatched = unmatched.len(),
            "Chunk joined"
        );

        if enriched.is_empty() {
            return Ok(());
        }

        self.batches
            .send(Chunk::new(sequence, enriched))
            .await
            .map_err(|_| {
                PipelineError::TaskFailed("sink writer stopped accepting batches".to_string())
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::StaticMasterData;
    use crate::dead_letter::MemoryDeadLetter;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use meshjoin_common::types::{Customer, Product};

    fn tx(order_id: i32, customer_id: i32, product_id: i32, quantity: i32) -> Transaction {
        let order_date = NaiveDate::from_ymd_opt(2019, 3, 14)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Transaction::new(order_id, order_date, product_id, customer_id, quantity, 1).unwrap()
    }

    fn customers() -> Vec<Customer> {
        vec![Customer::new(1, "Ayesha Khan", "F"), Customer::new(2, "Bilal Ahmed", "M")]
    }

    fn products() -> Vec<Product> {
        vec![
            Product::new(10, "Tea", BigDecimal::from(5), 3, "Tapal", 7, "Metro Lahore").unwrap(),
            Product::new(11, "Sugar", "2.50".parse().unwrap(), 4, "Nestle", 7, "Metro Lahore")
                .unwrap(),
        ]
    }

    fn snapshot() -> MasterDataSnapshot {
        MasterDataSnapshot::new(customers(), products())
    }

    struct Harness {
        queue: mpsc::Sender<HandOff>,
        batches: mpsc::Receiver<Chunk<EnrichedRecord>>,
        handle: tokio::task::JoinHandle<Result<Option<EndOfStream>>>,
        metrics: Arc<PipelineMetrics>,
    }

    fn spawn_join(unmatched: UnmatchedHandler) -> Harness {
        let (queue, queue_rx) = mpsc::channel(8);
        let (batch_tx, batches) = mpsc::channel(8);
        let metrics = Arc::new(PipelineMetrics::new());
        let cache = Arc::new(MasterDataCache::new(Arc::new(StaticMasterData::new(
            customers(),
            products(),
        ))));
        let processor = JoinProcessor::new(cache, queue_rx, batch_tx, unmatched, metrics.clone());
        Harness {
            queue,
            batches,
            handle: tokio::spawn(processor.run()),
            metrics,
        }
    }

    #[test]
    fn test_enrich_chunk_fills_dimension_fields_and_sale() {
        let chunk = Chunk::new(0, vec![tx(1, 1, 10, 4), tx(2, 2, 11, 3)]);
        let result = enrich_chunk(&snapshot(), chunk);

        assert!(result.unmatched.is_empty());
        assert_eq!(result.enriched.len(), 2);

        let first = &result.enriched[0];
        assert_eq!(first.customer_name, "Ayesha Khan");
        assert_eq!(first.gender, "F");
        assert_eq!(first.product_name, "Tea");
        assert_eq!(first.supplier_name, "Tapal");
        assert_eq!(first.store_name, "Metro Lahore");
        assert_eq!(first.sale, BigDecimal::from(20));

        let second = &result.enriched[1];
        assert_eq!(second.sale, "7.50".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_enrich_chunk_preserves_input_order() {
        let records: Vec<Transaction> = (1..=20)
            .map(|id| tx(id, 1 + id % 2, 10 + id % 2, 1))
            .collect();
        let result = enrich_chunk(&snapshot(), Chunk::new(3, records));

        let ids: Vec<i32> = result.enriched.iter().map(|r| r.order_id).collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_enrich_chunk_classifies_unmatched() {
        let chunk = Chunk::new(
            5,
            vec![
                tx(1, 999, 10, 1),
                tx(2, 1, 999, 1),
                tx(3, 998, 997, 1),
                tx(4, 1, 10, 1),
            ],
        );
        let result = enrich_chunk(&snapshot(), chunk);

        assert_eq!(result.enriched.len(), 1);
        assert_eq!(result.enriched[0].order_id, 4);

        let reasons: Vec<UnmatchedReason> = result.unmatched.iter().map(|u| u.reason).collect();
        assert_eq!(
            reasons,
            vec![
                UnmatchedReason::UnknownCustomer,
                UnmatchedReason::UnknownProduct,
                UnmatchedReason::UnknownCustomerAndProduct,
            ]
        );
        assert!(result.unmatched.iter().all(|u| u.chunk_sequence == 5));
    }

    #[test]
    fn test_dead_letter_policy_requires_sink() {
        let err = UnmatchedHandler::from_policy(UnmatchedPolicy::DeadLetter, None).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let handler = UnmatchedHandler::from_policy(
            UnmatchedPolicy::DeadLetter,
            Some(Arc::new(MemoryDeadLetter::new())),
        )
        .unwrap();
        assert!(matches!(handler, UnmatchedHandler::DeadLetter(_)));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drop_policy_counts_without_warning() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let metrics = PipelineMetrics::new();
        let chunk = Chunk::new(2, vec![tx(1, 999, 10, 1), tx(2, 1, 998, 1)]);
        let Enrichment { unmatched, .. } = enrich_chunk(&snapshot(), chunk);

        UnmatchedHandler::Drop
            .on_unmatched(&unmatched, &metrics)
            .await
            .unwrap();

        assert_eq!(metrics.snapshot().records_dead_lettered, 0);
        assert!(logs.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_batch_per_chunk_and_end_is_returned() {
        let mut harness = spawn_join(UnmatchedHandler::Drop);

        let first: Vec<Transaction> = (1..=100).map(|id| tx(id, 1, 10, 4)).collect();
        let second: Vec<Transaction> = (101..=150).map(|id| tx(id, 1, 10, 4)).collect();
        harness.queue.send(HandOff::Chunk(Chunk::new(0, first))).await.unwrap();
        harness.queue.send(HandOff::Chunk(Chunk::new(1, second))).await.unwrap();
        harness.queue.send(HandOff::End(EndOfStream::Exhausted)).await.unwrap();

        let end = harness.handle.await.unwrap().unwrap();
        assert_eq!(end, Some(EndOfStream::Exhausted));

        let a = harness.batches.recv().await.unwrap();
        let b = harness.batches.recv().await.unwrap();
        assert_eq!((a.sequence, a.len()), (0, 100));
        assert_eq!((b.sequence, b.len()), (1, 50));
        assert!(a.records.iter().all(|r| r.sale == BigDecimal::from(20)));
        assert!(harness.batches.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fully_unmatched_chunk_produces_no_batch() {
        let mut harness = spawn_join(UnmatchedHandler::Drop);

        harness
            .queue
            .send(HandOff::Chunk(Chunk::new(0, vec![tx(1, 999, 10, 1)])))
            .await
            .unwrap();
        harness.queue.send(HandOff::End(EndOfStream::Exhausted)).await.unwrap();

        harness.handle.await.unwrap().unwrap();
        assert!(harness.batches.recv().await.is_none());

        let metrics = harness.metrics.snapshot();
        assert_eq!(metrics.records_unmatched, 1);
        assert_eq!(metrics.records_enriched, 0);
        assert_eq!(metrics.chunks_processed, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_receives_unmatched() {
        let dead_letter = Arc::new(MemoryDeadLetter::new());
        let mut harness = spawn_join(UnmatchedHandler::DeadLetter(dead_letter.clone()));

        harness
            .queue
            .send(HandOff::Chunk(Chunk::new(0, vec![tx(1, 1, 10, 1), tx(2, 999, 10, 1)])))
            .await
            .unwrap();
        harness.queue.send(HandOff::End(EndOfStream::Exhausted)).await.unwrap();
        harness.handle.await.unwrap().unwrap();

        let batch = harness.batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);

        let letters = dead_letter.records().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].transaction.order_id, 2);
        assert_eq!(letters[0].reason, UnmatchedReason::UnknownCustomer);
        assert_eq!(harness.metrics.snapshot().records_dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_on_first_unmatched() {
        let mut harness = spawn_join(UnmatchedHandler::FailFast);

        harness
            .queue
            .send(HandOff::Chunk(Chunk::new(0, vec![tx(1, 1, 10, 1), tx(7, 1, 999, 1)])))
            .await
            .unwrap();

        let err = harness.handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnmatchedReference { order_id: 7, .. }
        ));
        assert!(harness.batches.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_without_end_returns_none() {
        let harness = spawn_join(UnmatchedHandler::Drop);
        drop(harness.queue);
        assert_eq!(harness.handle.await.unwrap().unwrap(), None);
    }
}
