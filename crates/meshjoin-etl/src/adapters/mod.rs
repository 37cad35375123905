//! File and database collaborators for the pipeline stages

pub mod csv;
pub mod jsonl;
#[cfg(feature = "database")]
pub mod postgres;

pub use self::csv::{CsvMasterData, CsvTransactionSource};
pub use self::jsonl::{JsonLinesDeadLetter, JsonLinesSink};
#[cfg(feature = "database")]
pub use self::postgres::{create_pool, PgMasterData, PgTransactionSource, PostgresSink};
