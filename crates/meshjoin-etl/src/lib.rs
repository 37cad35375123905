//! Meshjoin ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streaming enrichment of sales transactions into a warehouse fact table.
//!
//! # Stages
//!
//! - **Reader**: pulls transactions in `order_date` order, cuts them into
//!   fixed-size chunks and publishes them onto a bounded hand-off queue
//! - **Join**: loads customers and products once, then enriches every chunk
//!   and computes `sale = quantity * price`
//! - **Writer**: writes each enriched chunk to the warehouse as one batch
//!
//! # Example
//!
//! ```no_run
//! use meshjoin_etl::adapters::{CsvMasterData, CsvTransactionSource, JsonLinesSink};
//! use meshjoin_etl::{Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::new(
//!         PipelineConfig::default(),
//!         Box::new(CsvTransactionSource::new("data/transactions.csv")),
//!         Arc::new(CsvMasterData::new("data/customers.csv", "data/products.csv")),
//!         Arc::new(JsonLinesSink::create("warehouse.jsonl").await?),
//!     );
//!
//!     let mut running = pipeline.start()?;
//!     let report = running.wait().await;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod join;
pub mod metrics;
pub mod orchestrator;
pub mod reader;
pub mod sink;
pub mod writer;

// Re-export commonly used types
pub use cache::{MasterDataCache, MasterDataSource, StaticMasterData};
pub use config::{PipelineConfig, SinkErrorPolicy, UnmatchedPolicy};
pub use dead_letter::{DeadLetterSink, MemoryDeadLetter, UnmatchedReason, UnmatchedTransaction};
pub use error::{PipelineError, Result};
pub use metrics::MetricsSnapshot;
pub use orchestrator::{Pipeline, PipelineReport, RunOutcome, RunningPipeline, StopSignal};
pub use reader::{EndOfStream, TransactionSource, VecTransactionSource};
pub use sink::{MemorySink, WarehouseSink};
