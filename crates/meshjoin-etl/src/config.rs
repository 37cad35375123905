//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PipelineError, Result};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default number of transactions per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default pause after each full chunk, in milliseconds.
pub const DEFAULT_PACE_INTERVAL_MS: u64 = 100;

/// Default capacity of the reader -> join hand-off queue, in chunks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Default capacity of the join -> writer batch queue, in batches.
pub const DEFAULT_SINK_QUEUE_CAPACITY: usize = 4;

/// Default grace period for shutdown, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 60_000;

/// Default warehouse table for the Postgres sink.
pub const DEFAULT_WAREHOUSE_TABLE: &str = "warehouse_sales";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/metro_dw";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Postgres caps a single statement at this many bind parameters.
pub const POSTGRES_MAX_BIND_PARAMS: usize = 65_535;

/// Columns written per warehouse row.
pub const WAREHOUSE_COLUMNS: usize = 14;

/// What the join stage does with a transaction whose customer or product is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedPolicy {
    /// Drop the transaction without recording an error
    #[default]
    Drop,
    /// Hand the transaction to the dead-letter sink
    DeadLetter,
    /// Abort the run
    FailFast,
}

impl std::str::FromStr for UnmatchedPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(UnmatchedPolicy::Drop),
            "dead-letter" | "dead_letter" | "deadletter" => Ok(UnmatchedPolicy::DeadLetter),
            "fail-fast" | "fail_fast" | "failfast" => Ok(UnmatchedPolicy::FailFast),
            _ => Err(PipelineError::Config(format!("Invalid unmatched policy: {}", s))),
        }
    }
}

impl std::fmt::Display for UnmatchedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmatchedPolicy::Drop => write!(f, "drop"),
            UnmatchedPolicy::DeadLetter => write!(f, "dead-letter"),
            UnmatchedPolicy::FailFast => write!(f, "fail-fast"),
        }
    }
}

/// What the writer stage does when the sink rejects a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SinkErrorPolicy {
    /// Log the failed batch and keep writing later batches
    #[default]
    Skip,
    /// Stop the run
    Abort,
}

impl std::str::FromStr for SinkErrorPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "skip" | "continue" => Ok(SinkErrorPolicy::Skip),
            "abort" => Ok(SinkErrorPolicy::Abort),
            _ => Err(PipelineError::Config(format!("Invalid sink error policy: {}", s))),
        }
    }
}

impl std::fmt::Display for SinkErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkErrorPolicy::Skip => write!(f, "skip"),
            SinkErrorPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Settings injected into the pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub pace_interval_ms: u64,
    pub queue_capacity: usize,
    pub sink_queue_capacity: usize,
    pub shutdown_grace_ms: u64,
    pub unmatched_policy: UnmatchedPolicy,
    pub sink_error_policy: SinkErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pace_interval_ms: DEFAULT_PACE_INTERVAL_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_queue_capacity: DEFAULT_SINK_QUEUE_CAPACITY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            unmatched_policy: UnmatchedPolicy::default(),
            sink_error_policy: SinkErrorPolicy::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Whole milliseconds in `duration`, saturating instead of wrapping
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PipelineConfig {
    /// Load configuration from `.env`, `MESHJOIN_*` variables and defaults
    ///
    /// Malformed numeric values fall back to the default; malformed policy
    /// names are rejected.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self {
            chunk_size: env_or("MESHJOIN_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            pace_interval_ms: env_or("MESHJOIN_PACE_INTERVAL_MS", DEFAULT_PACE_INTERVAL_MS),
            queue_capacity: env_or("MESHJOIN_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            sink_queue_capacity: env_or(
                "MESHJOIN_SINK_QUEUE_CAPACITY",
                DEFAULT_SINK_QUEUE_CAPACITY,
            ),
            ..Self::default()
        };

        // Whole seconds in the environment, milliseconds internally
        if let Some(secs) = std::env::var("MESHJOIN_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.shutdown_grace_ms = secs.saturating_mul(1000);
        }

        if let Ok(policy) = std::env::var("MESHJOIN_UNMATCHED_POLICY") {
            config.unmatched_policy = policy.parse()?;
        }

        if let Ok(policy) = std::env::var("MESHJOIN_SINK_ERROR_POLICY") {
            config.sink_error_policy = policy.parse()?;
        }

        config.validate()?;

        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_pace_interval(mut self, pace: Duration) -> Self {
        self.pace_interval_ms = millis(pace);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_sink_queue_capacity(mut self, capacity: usize) -> Self {
        self.sink_queue_capacity = capacity;
        self
    }

    pub fn with_unmatched_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.unmatched_policy = policy;
        self
    }

    pub fn with_sink_error_policy(mut self, policy: SinkErrorPolicy) -> Self {
        self.sink_error_policy = policy;
        self
    }

    /// Grace period for [`RunningPipeline::shutdown`](crate::RunningPipeline::shutdown),
    /// kept to millisecond precision
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = millis(grace);
        self
    }

    pub fn pace_interval(&self) -> Duration {
        Duration::from_millis(self.pace_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.sink_queue_capacity == 0 {
            return Err(PipelineError::Config(
                "sink_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_grace_ms == 0 {
            return Err(PipelineError::Config(
                "shutdown grace must be at least 1ms".to_string(),
            ));
        }

        Ok(())
    }
}

/// Postgres connection settings for the `database` collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub warehouse_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            warehouse_table: DEFAULT_WAREHOUSE_TABLE.to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
            connect_timeout_secs: env_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            ),
            warehouse_table: std::env::var("MESHJOIN_TABLE")
                .unwrap_or_else(|_| DEFAULT_WAREHOUSE_TABLE.to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(PipelineError::Config("Database URL cannot be empty".to_string()));
        }

        if self.max_connections == 0 {
            return Err(PipelineError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        // The table name is spliced into SQL, so only plain identifiers are accepted
        let valid_table = !self.warehouse_table.is_empty()
            && self
                .warehouse_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid_table {
            return Err(PipelineError::Config(format!(
                "Invalid warehouse table name: {}",
                self.warehouse_table
            )));
        }

        Ok(())
    }

    /// Largest chunk that fits in one multi-row INSERT
    pub fn max_chunk_size() -> usize {
        POSTGRES_MAX_BIND_PARAMS / WAREHOUSE_COLUMNS
    }
}
