//! Structured logging for Tether
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Pretty Console**: Human-readable output for development
//! - **File Rotation**: Daily/hourly rolling files via tracing-appender
//! - **User Context**: Attribute spans to the signed-in user without
//!   passing the id around
//!
//! # Quick Start
//!
//! ```ignore
//! use tether_logging::{LogConfig, TetherSubscriberBuilder};
//!
//! // JSONL to console
//! let _guard = TetherSubscriberBuilder::new().init()?;
//!
//! // Pretty output while developing
//! let _guard = TetherSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```
//!
//! Keep the returned [`LogGuard`] alive for as long as file output should
//! be flushed.

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{UserContextData, UserContextGuard};
pub use layers::{UserContextExtension, UserContextLayer, user_context_of};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Errors from subscriber initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid filter directive: {0}")]
    InvalidFilter(String),

    #[error("Failed to open log file: {0}")]
    File(String),

    #[error("A global subscriber is already set")]
    AlreadyInitialized,
}

/// Keeps non-blocking file writers flushing; drop it on shutdown
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

type Base = Layered<UserContextLayer, Layered<EnvFilter, Registry>>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Builder for configuring and initializing the Tether logging subscriber
///
/// Console output is JSONL unless `pretty` is set. File output, when
/// configured, is always JSONL.
#[derive(Debug, Clone, Default)]
pub struct TetherSubscriberBuilder {
    config: LogConfig,
}

impl TetherSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber as the global default
    ///
    /// RUST_LOG, when set, takes precedence over `default_level`.
    pub fn init(self) -> Result<LogGuard, LoggingError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
        };

        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if self.config.console.enabled {
            layers.push(self.console_layer());
        }
        if let Some(file_config) = &self.config.file {
            let (writer, worker) = file_writer(file_config)?;
            guard._workers.push(worker);
            layers.push(self.jsonl_layer(writer));
        }

        Registry::default()
            .with(env_filter)
            .with(UserContextLayer::new())
            .with(layers)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        Ok(guard)
    }

    fn console_layer(&self) -> BoxedLayer {
        if self.config.console.pretty {
            tracing_subscriber::fmt::layer()
                .with_ansi(self.config.console.ansi)
                .with_target(true)
                .boxed()
        } else {
            self.jsonl_layer(std::io::stdout)
        }
    }

    fn jsonl_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_thread_ids(jsonl.include_thread_info)
            .with_thread_names(jsonl.include_thread_info)
            .with_writer(writer)
            .boxed()
    }
}

fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match config.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max) = config.max_files {
        builder = builder.max_log_files(max);
    }

    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::File(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Result<LogGuard, LoggingError> {
    TetherSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests; repeated calls are no-ops
pub fn init_testing() {
    let _ = TetherSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}
