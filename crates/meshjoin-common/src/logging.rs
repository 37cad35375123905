//! Logging Configuration and Initialization
//!
//! Every meshjoin binary sets up `tracing` through this module so that pipeline
//! stages log the same way regardless of where they run. It supports:
//!
//! - Console output, a daily rotated file, or both
//! - Text or JSON events
//! - A base level plus per-module filter directives
//! - `LOG_*` environment overrides
//!
//! Stages log with structured fields rather than formatted strings:
//!
//! ```rust,ignore
//! use tracing::{info, warn};
//!
//! info!(sequence = chunk.sequence, records = chunk.len(), "Chunk published");
//! warn!(order_id = tx.order_id, "Transaction references unknown customer");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use meshjoin_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!
//!     info!("Pipeline starting");
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Event encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown log format '{}'", other)),
        }
    }
}

/// Where and how events are written
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub console: bool,
    /// Write to `<log_dir>/<file_prefix>.<date>`, rotated daily
    pub file: bool,
    pub log_dir: PathBuf,
    pub file_prefix: String,
    /// Extra directives such as "meshjoin_etl=debug,sqlx=warn"
    pub directives: Option<String>,
    pub show_location: bool,
    pub show_thread_ids: bool,
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            console: true,
            file: false,
            log_dir: PathBuf::from("./logs"),
            file_prefix: "meshjoin".to_string(),
            directives: None,
            show_location: false,
            show_thread_ids: false,
            show_target: true,
        }
    }
}


impl LogConfig {
    /// Defaults overlaid with the `LOG_*` environment
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Overlay environment variables on this configuration.
    ///
    /// - `LOG_LEVEL`: trace, debug, info, warn, error
    /// - `LOG_OUTPUT`: console, file, both
    /// - `LOG_FORMAT`: text, json
    /// - `LOG_DIR`, `LOG_FILE_PREFIX`, `LOG_FILTER`
    /// - `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`: true/false
    pub fn merge_env(self) -> Result<Self> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Overlay settings looked up by variable name. Blank values count as unset.
    fn merge_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let env_flag = |name: &str, current: bool| {
            env_var(name).and_then(|v| v.parse().ok()).unwrap_or(current)
        };

        if let Some(level) = env_var("LOG_LEVEL") {
            self.level = level
                .trim()
                .parse()
                .map_err(|_| anyhow!("unknown log level '{}'", level))?;
        }

        if let Some(output) = env_var("LOG_OUTPUT") {
            (self.console, self.file) = match output.to_ascii_lowercase().as_str() {
                "console" | "stdout" => (true, false),
                "file" => (false, true),
                "both" | "all" => (true, true),
                other => return Err(anyhow!("unknown log output '{}'", other)),
            };
        }

        if let Some(format) = env_var("LOG_FORMAT") {
            self.format = format.parse()?;
        }

        if let Some(dir) = env_var("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_var("LOG_FILE_PREFIX") {
            self.file_prefix = prefix;
        }
        if let Some(directives) = env_var("LOG_FILTER") {
            self.directives = Some(directives);
        }

        self.show_location = env_flag("LOG_INCLUDE_LOCATION", self.show_location);
        self.show_thread_ids = env_flag("LOG_INCLUDE_THREAD_IDS", self.show_thread_ids);
        self.show_target = env_flag("LOG_INCLUDE_TARGETS", self.show_target);

        Ok(self)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Also write to a daily rotated file under `dir`
    pub fn with_file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file = true;
        self.log_dir = dir.into();
        self
    }

    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());

        let extra = self.directives.as_deref().unwrap_or_default();
        for directive in extra.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let parsed = directive
                .parse()
                .with_context(|| format!("invalid filter directive '{}'", directive))?;
            filter = filter.add_directive(parsed);
        }

        Ok(filter)
    }
}

/// Holds the non-blocking file writer open; dropping it flushes pending file output
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn event_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_file(config.show_location)
        .with_line_number(config.show_location)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

/// Install the global subscriber. Call once per process.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if config.console {
        layers.push(event_layer(config, std::io::stdout, true));
    }

    if config.file {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("cannot create log directory {}", config.log_dir.display()))?;

        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(event_layer(config, writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
