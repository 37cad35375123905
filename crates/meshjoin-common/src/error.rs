//! Error types shared across meshjoin crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while building or decoding records
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
