//! Side channel for transactions that fail to join

use async_trait::async_trait;
use meshjoin_common::types::Transaction;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// Which dimension lookup failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    UnknownCustomer,
    UnknownProduct,
    UnknownCustomerAndProduct,
}

impl std::fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmatchedReason::UnknownCustomer => write!(f, "customer"),
            UnmatchedReason::UnknownProduct => write!(f, "product"),
            UnmatchedReason::UnknownCustomerAndProduct => write!(f, "customer and product"),
        }
    }
}

/// A transaction the join stage could not enrich
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedTransaction {
    pub transaction: Transaction,
    pub reason: UnmatchedReason,
    /// Sequence of the chunk the transaction arrived in
    pub chunk_sequence: u64,
}

/// Receiver of unmatched transactions
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write_unmatched(&self, records: &[UnmatchedTransaction]) -> Result<()>;
}

/// Dead-letter sink kept in memory
#[derive(Debug, Default)]
pub struct MemoryDeadLetter {
    records: Mutex<Vec<UnmatchedTransaction>>,
}

impl MemoryDeadLetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UnmatchedTransaction> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetter {
    async fn write_unmatched(&self, records: &[UnmatchedTransaction]) -> Result<()> {
        self.records.lock().await.extend_from_slice(records);
        Ok(())
    }
}
