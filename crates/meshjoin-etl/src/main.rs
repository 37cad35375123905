//! Meshjoin ETL - streaming transaction enrichment

use anyhow::{bail, Context, Result};
use clap::Parser;
use meshjoin_common::logging::{init_logging, LogConfig};
use meshjoin_etl::adapters::{
    CsvMasterData, CsvTransactionSource, JsonLinesDeadLetter, JsonLinesSink,
};
use meshjoin_etl::{
    DeadLetterSink, MasterDataSource, Pipeline, PipelineConfig, RunOutcome, SinkErrorPolicy,
    TransactionSource, UnmatchedPolicy, WarehouseSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "meshjoin-etl")]
#[command(author, version, about = "Enrich streaming sales transactions into the warehouse")]
struct Cli {
    /// Where transactions and master data come from
    #[command(subcommand)]
    source: Source,

    /// Transactions per chunk
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Chunks buffered between reader and join stage
    #[arg(long, global = true)]
    queue_capacity: Option<usize>,

    /// Pause after each published chunk, in milliseconds
    #[arg(long, global = true)]
    pace_ms: Option<u64>,

    /// Unmatched transaction policy: drop, dead-letter or fail-fast
    #[arg(long, global = true)]
    unmatched: Option<UnmatchedPolicy>,

    /// JSON Lines file receiving unmatched transactions
    #[arg(long, global = true)]
    dead_letter: Option<PathBuf>,

    /// Sink failure policy: skip or abort
    #[arg(long, global = true)]
    sink_errors: Option<SinkErrorPolicy>,

    /// Seconds allowed for draining after Ctrl+C or SIGTERM
    #[arg(long, global = true)]
    grace_secs: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Source {
    /// Read CSV files, write a JSON Lines warehouse file
    Csv {
        /// Transactions file, sorted by ORDER_DATE
        #[arg(long)]
        transactions: PathBuf,

        /// Customers file
        #[arg(long)]
        customers: PathBuf,

        /// Products file
        #[arg(long)]
        products: PathBuf,

        /// Output file
        #[arg(short, long, default_value = "./warehouse_sales.jsonl")]
        output: PathBuf,
    },

    /// Read from and write to Postgres
    #[cfg(feature = "database")]
    Postgres {
        /// Overrides DATABASE_URL
        #[arg(long)]
        database_url: Option<String>,
    },
}

struct Collaborators {
    source: Box<dyn TransactionSource>,
    master_data: Arc<dyn MasterDataSource>,
    sink: Arc<dyn WarehouseSink>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let log_config = LogConfig::default()
        .with_level(log_level)
        .with_file_prefix("meshjoin-etl");

    // Environment variables take precedence over flags
    let log_config = log_config
        .merge_env()
        .context("Invalid logging configuration")?;

    let _log_guard = init_logging(&log_config)?;

    let config = pipeline_config(&cli)?;
    let grace = config.shutdown_grace();

    let collaborators = match &cli.source {
        Source::Csv {
            transactions,
            customers,
            products,
            output,
        } => {
            info!(
                transactions = %transactions.display(),
                output = %output.display(),
                "Running CSV pipeline"
            );
            Collaborators {
                source: Box::new(CsvTransactionSource::new(transactions)),
                master_data: Arc::new(CsvMasterData::new(customers, products)),
                sink: Arc::new(
                    JsonLinesSink::create(output)
                        .await
                        .with_context(|| format!("Failed to open {}", output.display()))?,
                ),
            }
        }
        #[cfg(feature = "database")]
        Source::Postgres { database_url } => {
            postgres_collaborators(database_url.clone(), config.chunk_size).await?
        }
    };

    let mut pipeline = Pipeline::new(
        config,
        collaborators.source,
        collaborators.master_data,
        collaborators.sink,
    );

    if let Some(path) = &cli.dead_letter {
        let dead_letter: Arc<dyn DeadLetterSink> = Arc::new(
            JsonLinesDeadLetter::create(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        );
        pipeline = pipeline.with_dead_letter(dead_letter);
    }

    let mut running = pipeline.start().context("Failed to start pipeline")?;

    let report = tokio::select! {
        report = running.wait() => report,
        _ = shutdown_signal() => running.shutdown(grace).await,
    };

    info!(
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "Run report"
    );

    if let RunOutcome::Aborted(reason) = &report.outcome {
        error!(reason = %reason, "Pipeline aborted");
        bail!("Pipeline aborted: {}", reason);
    }

    Ok(())
}

/// Environment configuration with command-line overrides applied
fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;

    if let Some(chunk_size) = cli.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if let Some(capacity) = cli.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }
    if let Some(pace_ms) = cli.pace_ms {
        config = config.with_pace_interval(Duration::from_millis(pace_ms));
    }
    if let Some(policy) = cli.sink_errors {
        config = config.with_sink_error_policy(policy);
    }
    if let Some(grace_secs) = cli.grace_secs {
        config = config.with_shutdown_grace(Duration::from_secs(grace_secs));
    }

    match (cli.unmatched, &cli.dead_letter) {
        (Some(policy), _) => config = config.with_unmatched_policy(policy),
        (None, Some(_)) => config = config.with_unmatched_policy(UnmatchedPolicy::DeadLetter),
        (None, None) => {},
    }

    config.validate().context("Invalid pipeline configuration")?;
    Ok(config)
}

#[cfg(feature = "database")]
async fn postgres_collaborators(
    database_url: Option<String>,
    chunk_size: usize,
) -> Result<Collaborators> {
    use meshjoin_etl::adapters::{create_pool, PgMasterData, PgTransactionSource, PostgresSink};
    use meshjoin_etl::config::DatabaseConfig;

    let mut db_config = DatabaseConfig::from_env().context("Invalid database configuration")?;
    if let Some(url) = database_url {
        db_config.url = url;
    }

    if chunk_size > DatabaseConfig::max_chunk_size() {
        bail!(
            "Chunk size {} exceeds the largest single INSERT batch ({})",
            chunk_size,
            DatabaseConfig::max_chunk_size()
        );
    }

    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to database")?;

    info!(table = %db_config.warehouse_table, "Running Postgres pipeline");

    Ok(Collaborators {
        source: Box::new(PgTransactionSource::new(pool.clone())),
        master_data: Arc::new(PgMasterData::new(pool.clone())),
        sink: Arc::new(PostgresSink::new(pool, &db_config)?),
    })
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, draining pipeline");
        },
        _ = terminate => {
            info!("Received terminate signal, draining pipeline");
        },
    }
}
