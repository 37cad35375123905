//! Pipeline error types

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by pipeline stages and their collaborators
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The one-time bulk load of customers/products failed. Fatal to the run.
    #[error("Master data load failed: {0}")]
    MasterDataLoad(String),

    #[error("Source read failed: {0}")]
    SourceRead(String),

    /// A whole batch was rejected by the warehouse sink
    #[error("Sink write failed for batch {sequence}: {message}")]
    SinkWrite { sequence: u64, message: String },

    #[error("Dead-letter write failed: {0}")]
    DeadLetter(String),

    #[error("Transaction {order_id} references unknown {reference}")]
    UnmatchedReference { order_id: i32, reference: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] meshjoin_common::CommonError),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),
}
