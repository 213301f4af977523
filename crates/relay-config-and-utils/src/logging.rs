//! Logging initialization for the relay client.

use observability::{LogConfig, LogFormat};
use std::path::PathBuf;

/// Initialize the logging system for `relayd`.
///
/// Logs go to stderr, compact unless `json` is set, and are additionally
/// appended to `log_file` as JSON lines when one is given. `RUST_LOG`
/// overrides `level`.
pub fn init_logging(level: &str, log_file: Option<PathBuf>, json: bool) {
    observability::init_with_config(LogConfig {
        service_name: "relayd".into(),
        default_level: level.into(),
        log_path: log_file,
        also_stderr: true,
        stderr_format: if json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
