//! # Observability
//!
//! Logging setup for the relay client.
//!
//! Services call [`init_with_config`] once at startup and use the `tracing`
//! macros everywhere else. They don't need to know where logs go:
//!
//! - stderr, compact or JSON, for interactive runs and container logs
//! - optionally a JSONL file (one object per line, flushed per line) that
//!   can be tailed with `tail -f relayd.jsonl | jq`
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "relayd".into(),
//!         default_level: "debug".into(),
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

mod file_writer;
mod json_layer;

pub use file_writer::{FileLogWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Output format for stderr logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSONL line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional JSONL log file.
    pub log_path: Option<PathBuf>,

    /// Emit logs to stderr.
    pub also_stderr: bool,

    /// Format used on stderr.
    pub stderr_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
            stderr_format: LogFormat::Compact,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Installing a second global subscriber is a no-op, so calling this more
/// than once (as tests do) is harmless. A log file that cannot be opened is
/// reported on stderr and skipped.
pub fn init_with_config(config: LogConfig) {
    let mut file_error = None;
    let file_layer = match &config.log_path {
        Some(path) => match FileLogWriter::new(path) {
            Ok(writer) => Some(
                JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                    .with_filter(env_filter(&config.default_level)),
            ),
            Err(e) => {
                file_error = Some((path.clone(), e));
                None
            }
        },
        None => None,
    };

    let (compact_layer, json_layer) = match (config.also_stderr, config.stderr_format) {
        (false, _) => (None, None),
        (true, LogFormat::Compact) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter(&config.default_level)),
            ),
            None,
        ),
        (true, LogFormat::Json) => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter(&config.default_level)),
            ),
        ),
    };

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(compact_layer)
        .with(json_layer)
        .try_init();

    if let Some((path, e)) = file_error {
        tracing::warn!(log_path = %path.display(), error = %e, "Failed to open log file");
    } else if let Some(path) = &config.log_path {
        tracing::debug!(log_path = %path.display(), "observability initialized");
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
