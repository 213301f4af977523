//! relayd - receive webhooks from Webhook Relay and forward them to local destinations.

mod forward;

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use relay_config_and_utils::{default_config_path, init_logging, parse_level, Config};

/// relayd command-line interface.
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(about = "Webhook Relay forwarding client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Access key
    #[arg(long, env = "RELAY_KEY", global = true, hide_env_values = true)]
    key: Option<String>,

    /// Access secret
    #[arg(long, env = "RELAY_SECRET", global = true, hide_env_values = true)]
    secret: Option<String>,

    /// Enable debug logging. `DEBUG` accepts 1/0, yes/no, true/false
    #[arg(
        long,
        env = "DEBUG",
        global = true,
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    debug: bool,

    /// Config file. Defaults to ~/.webhookrelay/relayd.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON lines logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to stderr as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Subscribe to buckets and forward their webhooks
    Forward(ForwardArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ForwardArgs {
    /// Buckets to subscribe to (comma separated)
    #[arg(short, long, env = "BUCKETS", value_delimiter = ',')]
    pub buckets: Vec<String>,

    /// Delivery retries per webhook
    #[arg(long, env = "RELAY_RETRIES")]
    pub retries: Option<u32>,

    /// Skip TLS verification for the relay and destinations
    #[arg(long)]
    pub insecure: bool,

    /// Concurrent deliveries
    #[arg(long)]
    pub workers: Option<usize>,

    /// Webhooks that may wait for a free worker
    #[arg(long)]
    pub queue: Option<usize>,

    /// Do not report delivery status back to Webhook Relay
    #[arg(long)]
    pub no_ack: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().or_else(default_config_path);
    let config = Config::load(config_path.as_deref())?;

    // Initialize logging
    let level = if cli.debug { "debug" } else { config.log_level.as_str() };
    init_logging(&parse_level(level).as_str().to_lowercase(), cli.log_file.clone(), cli.log_json);

    let credentials = forward::Credentials::new(cli.key, cli.secret)?;

    match cli.command {
        Commands::Forward(args) => forward::run(config, credentials, args).await?,
    }

    Ok(())
}
