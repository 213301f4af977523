//! Configuration, error types, and logging setup for the relay client.

mod config;
mod error;
mod logging;

pub use config::{default_config_path, Config, DEFAULT_LOG_LEVEL, DEFAULT_SERVER_ADDRESS};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
