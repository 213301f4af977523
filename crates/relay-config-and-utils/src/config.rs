//! Configuration management for `relayd`.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Default relay service address.
pub const DEFAULT_SERVER_ADDRESS: &str = "https://my.webhookrelay.com:443";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Relay client configuration.
///
/// Credentials and bucket selection are not part of the file; they come from
/// the command line or its environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay service base URL (http, https, ws or wss).
    pub server_address: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Maximum retries per webhook delivery.
    pub retries: u32,
    /// Skip TLS certificate verification for the socket and for deliveries.
    pub insecure: bool,
    /// Number of concurrent delivery workers.
    pub dispatch_workers: usize,
    /// Deliveries that may wait for a free worker.
    pub dispatch_queue: usize,
    /// Reconnect when no ping arrives for this long.
    pub health_timeout_secs: u64,
    /// Pause between failed connection attempts.
    pub reconnect_delay_secs: u64,
    /// Timeout for a single delivery attempt.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            retries: 3,
            insecure: false,
            dispatch_workers: 256,
            dispatch_queue: 1,
            health_timeout_secs: 53,
            reconnect_delay_secs: 2,
            request_timeout_secs: 30,
        }
    }
}

/// Default location of the optional config file (`~/.webhookrelay/relayd.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".webhookrelay").join("relayd.json"))
}

impl Config {
    /// Load configuration from `path` when it exists, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Self::default(),
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Some(address) = non_empty_env("WEBHOOKRELAY_SERVER_ADDRESS") {
            self.server_address = address;
        }
        if let Some(level) = non_empty_env("RELAY_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Check values that would otherwise fail later at runtime.
    pub fn validate(&self) -> CoreResult<()> {
        let url = self.server_url()?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(CoreError::Config(format!(
                "unsupported server address scheme '{}'",
                url.scheme()
            )));
        }
        if self.dispatch_workers == 0 {
            return Err(CoreError::Config("dispatch_workers must be at least 1".into()));
        }
        if self.dispatch_queue == 0 {
            return Err(CoreError::Config("dispatch_queue must be at least 1".into()));
        }
        if self.health_timeout_secs == 0 {
            return Err(CoreError::Config("health_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Get the server address as a parsed URL.
    pub fn server_url(&self) -> CoreResult<Url> {
        Url::parse(&self.server_address).map_err(CoreError::from)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
