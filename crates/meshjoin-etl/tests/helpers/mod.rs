//! Test helpers for meshjoin pipeline integration tests
//!
//! This module provides utilities for:
//! - Tracing setup for test output
//! - Fixture builders for transactions and master data
//! - Collaborators that fail or stall on purpose

pub mod fixtures;

use async_trait::async_trait;
use meshjoin_common::types::{Customer, EnrichedRecord, Product};
use meshjoin_etl::{MasterDataSource, MemorySink, PipelineError, Result, WarehouseSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// Re-export fixtures for convenience
pub use fixtures::*;

/// Route `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meshjoin_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Master data source whose customer read always fails
pub struct UnavailableMasterData;

#[async_trait]
impl MasterDataSource for UnavailableMasterData {
    async fn load_customers(&self) -> Result<Vec<Customer>> {
        Err(PipelineError::SourceRead("connection refused".to_string()))
    }

    async fn load_products(&self) -> Result<Vec<Product>> {
        Ok(Vec::new())
    }
}

/// Sink that counts calls and rejects the n-th batch (0-based)
pub struct FlakySink {
    pub inner: MemorySink,
    reject_call: usize,
    calls: AtomicUsize,
}

impl FlakySink {
    pub fn rejecting(reject_call: usize) -> Self {
        Self {
            inner: MemorySink::new(),
            reject_call,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseSink for FlakySink {
    async fn write_batch(&self, records: &[EnrichedRecord]) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.reject_call {
            return Err(PipelineError::Io(std::io::Error::other("unique violation")));
        }
        self.inner.write_batch(records).await
    }
}

/// Sink that sleeps before every write
pub struct SlowSink {
    pub inner: MemorySink,
    delay: Duration,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemorySink::new(),
            delay,
        }
    }
}

#[async_trait]
impl WarehouseSink for SlowSink {
    async fn write_batch(&self, records: &[EnrichedRecord]) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.write_batch(records).await
    }
}
