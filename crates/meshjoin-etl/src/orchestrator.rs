//! Pipeline orchestration
//!
//! Wires the reader, join and writer stages together over two bounded
//! queues, runs each stage as its own task and owns the shared stop signal.
//! A fatal error in any stage raises the stop signal so the others wind down.

use meshjoin_common::types::{Chunk, EnrichedRecord};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cache::{MasterDataCache, MasterDataSource};
use crate::config::PipelineConfig;
use crate::dead_letter::DeadLetterSink;
use crate::error::Result;
use crate::join::{JoinProcessor, UnmatchedHandler};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::reader::{EndOfStream, HandOff, StreamReader, TransactionSource};
use crate::sink::WarehouseSink;
use crate::writer::SinkWriter;

/// Cooperative stop flag observed by every stage
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The source was exhausted and every batch was drained
    Completed,
    /// A stop was requested and every stage wound down within the grace period
    Stopped,
    /// The source failed; everything read before the failure was drained
    SourceFailed(String),
    /// At least one stage was still running at the grace deadline and was cancelled
    Forced,
    /// A stage failed fatally
    Aborted(String),
}

impl RunOutcome {
    /// Completed and Stopped runs lost no data to errors
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::Stopped)
    }
}

/// Summary returned by [`RunningPipeline::wait`] and [`RunningPipeline::shutdown`]
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub outcome: RunOutcome,
    pub metrics: MetricsSnapshot,
    pub elapsed: Duration,
}

/// A configured, not yet started pipeline
pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn TransactionSource>,
    master_data: Arc<dyn MasterDataSource>,
    sink: Arc<dyn WarehouseSink>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn TransactionSource>,
        master_data: Arc<dyn MasterDataSource>,
        sink: Arc<dyn WarehouseSink>,
    ) -> Self {
        Self {
            config,
            source,
            master_data,
            sink,
            dead_letter: None,
        }
    }

    /// Destination for unmatched transactions under the dead-letter policy
    pub fn with_dead_letter(mut self, dead_letter: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// Spawn the three stages and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Fails only on invalid
    /// configuration, before any task is spawned.
    pub fn start(self) -> Result<RunningPipeline> {
        self.config.validate()?;
        let unmatched =
            UnmatchedHandler::from_policy(self.config.unmatched_policy, self.dead_letter)?;

        let stop = StopSignal::new();
        let metrics = Arc::new(PipelineMetrics::new());
        let cache = Arc::new(MasterDataCache::new(self.master_data));

        let (handoff_tx, handoff_rx) = mpsc::channel::<HandOff>(self.config.queue_capacity);
        let (batch_tx, batch_rx) =
            mpsc::channel::<Chunk<EnrichedRecord>>(self.config.sink_queue_capacity);

        let reader = StreamReader::new(
            self.source,
            &self.config,
            handoff_tx,
            stop.subscribe(),
            metrics.clone(),
        );
        let processor = JoinProcessor::new(cache, handoff_rx, batch_tx, unmatched, metrics.clone());
        let writer = SinkWriter::new(
            self.sink,
            batch_rx,
            self.config.sink_error_policy,
            metrics.clone(),
        );

        info!(
            chunk_size = self.config.chunk_size,
            pace_ms = self.config.pace_interval_ms,
            queue_capacity = self.config.queue_capacity,
            unmatched = %self.config.unmatched_policy,
            sink_errors = %self.config.sink_error_policy,
            "Starting pipeline"
        );

        let stages = [
            Stage::spawn("reader", &stop, async move { Ok(Some(reader.run().await)) }),
            Stage::spawn("join", &stop, processor.run()),
            Stage::spawn("writer", &stop, async move { writer.run().await.map(|()| None) }),
        ];

        Ok(RunningPipeline {
            stop,
            stages,
            metrics,
            grace: self.config.shutdown_grace(),
            started_at: Instant::now(),
        })
    }
}

type StageOutput = Result<Option<EndOfStream>>;

#[derive(Debug, Clone)]
enum StageExit {
    Finished(Option<EndOfStream>),
    Failed(String),
    Cancelled,
}

struct Stage {
    name: &'static str,
    handle: Option<JoinHandle<StageOutput>>,
    exit: Option<StageExit>,
}

impl Stage {
    fn spawn<F>(name: &'static str, stop: &StopSignal, work: F) -> Self
    where
        F: Future<Output = StageOutput> + Send + 'static,
    {
        let stop = stop.clone();
        let handle = tokio::spawn(
            async move {
                let output = work.await;
                if let Err(e) = &output {
                    error!(stage = name, error = %e, "Stage failed, stopping pipeline");
                    stop.trigger();
                }
                output
            }
            .instrument(info_span!("stage", name)),
        );

        Self {
            name,
            handle: Some(handle),
            exit: None,
        }
    }

    /// Wait for the task to end, cancelling it at `deadline` if given.
    ///
    /// Safe to call again if the returned future is dropped midway.
    async fn settle(&mut self, deadline: Option<Instant>) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        let joined = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut *handle).await.ok(),
            None => Some((&mut *handle).await),
        };

        let exit = match joined {
            Some(Ok(Ok(end))) => StageExit::Finished(end),
            Some(Ok(Err(e))) => StageExit::Failed(format!("{} stage: {}", self.name, e)),
            Some(Err(e)) => StageExit::Failed(format!("{} stage task failed: {}", self.name, e)),
            None => {
                warn!(stage = self.name, "Grace period elapsed, cancelling stage");
                handle.abort();
                match handle.await {
                    Ok(Ok(end)) => StageExit::Finished(end),
                    Ok(Err(e)) => StageExit::Failed(format!("{} stage: {}", self.name, e)),
                    Err(_) => StageExit::Cancelled,
                }
            }
        };

        self.handle = None;
        self.exit = Some(exit);
    }
}

/// Handle to a started pipeline
pub struct RunningPipeline {
    stop: StopSignal,
    stages: [Stage; 3],
    metrics: Arc<PipelineMetrics>,
    grace: Duration,
    started_at: Instant,
}

impl RunningPipeline {
    /// Ask the reader to stop intake without waiting for the run to end
    pub fn request_stop(&self) {
        self.stop.trigger();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Live counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Grace period from the pipeline configuration
    pub fn default_grace(&self) -> Duration {
        self.grace
    }

    pub fn is_finished(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.handle.as_ref().map_or(true, |h| h.is_finished()))
    }

    /// Wait for every stage to end on its own.
    ///
    /// Cancellation safe: dropping this future leaves the pipeline running
    /// and a later `wait` or `shutdown` picks up where it left off.
    pub async fn wait(&mut self) -> PipelineReport {
        for stage in self.stages.iter_mut() {
            stage.settle(None).await;
        }
        self.report()
    }

    /// Stop intake, let in-flight chunks drain for up to `grace`, then
    /// cancel whatever is still running. No stage task outlives this call.
    pub async fn shutdown(&mut self, grace: Duration) -> PipelineReport {
        info!(grace_secs = grace.as_secs_f64(), "Shutting down pipeline");
        self.stop.trigger();

        // A grace too large to represent means no deadline
        let deadline = Instant::now().checked_add(grace);
        for stage in self.stages.iter_mut() {
            stage.settle(deadline).await;
        }
        self.report()
    }

    fn report(&self) -> PipelineReport {
        let exits: Vec<&StageExit> = self.stages.iter().filter_map(|s| s.exit.as_ref()).collect();

        // Writer first: when it aborts, the join stage fails only as a consequence
        let failure = self.stages.iter().rev().find_map(|stage| match &stage.exit {
            Some(StageExit::Failed(reason)) => Some(reason.clone()),
            _ => None,
        });
        let cancelled = exits.iter().any(|e| matches!(e, StageExit::Cancelled));
        let end = match &self.stages[0].exit {
            Some(StageExit::Finished(end)) => end.clone(),
            _ => None,
        };

        let outcome = match (failure, cancelled, end) {
            (Some(reason), _, _) => RunOutcome::Aborted(reason),
            (None, true, _) => RunOutcome::Forced,
            (None, false, Some(EndOfStream::Exhausted)) => RunOutcome::Completed,
            (None, false, Some(EndOfStream::SourceFailed(reason))) => {
                RunOutcome::SourceFailed(reason)
            }
            (None, false, _) => RunOutcome::Stopped,
        };

        let report = PipelineReport {
            outcome,
            metrics: self.metrics.snapshot(),
            elapsed: self.started_at.elapsed(),
        };

        info!(
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed.as_millis() as u64,
            read = report.metrics.transactions_read,
            enriched = report.metrics.records_enriched,
            unmatched = report.metrics.records_unmatched,
            written = report.metrics.records_written,
            failed = report.metrics.records_failed,
            "Pipeline finished"
        );

        report
    }
}
