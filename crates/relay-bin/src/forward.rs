//! The `forward` command.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use relay_config_and_utils::Config;
use relay_session::{
    CancellationToken, DispatchConfig, Filter, HttpStatusSink, LogStatusSink, RelayConfig,
    RelaySession, StatusSink,
};
use tracing::{error, info, warn};
use webhook_forwarder::{DefaultForwarder, ForwarderConfig};

use crate::ForwardArgs;

/// Access key and secret, both required.
pub(crate) struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(key: Option<String>, secret: Option<String>) -> Result<Self, Box<dyn Error>> {
        let key = key.map(|k| k.trim().to_string()).unwrap_or_default();
        let secret = secret.map(|s| s.trim().to_string()).unwrap_or_default();

        if key.is_empty() || secret.is_empty() {
            return Err("access key and secret are required, use --key/--secret or RELAY_KEY/RELAY_SECRET".into());
        }
        Ok(Self { key, secret })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Trim bucket names and drop empty ones.
pub(crate) fn sanitize_buckets(buckets: &[String]) -> Vec<String> {
    buckets
        .iter()
        .map(|b| b.trim())
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply command-line overrides on top of the loaded configuration.
pub(crate) fn apply_overrides(mut config: Config, args: &ForwardArgs) -> Config {
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(workers) = args.workers {
        config.dispatch_workers = workers;
    }
    if let Some(queue) = args.queue {
        config.dispatch_queue = queue;
    }
    config.insecure |= args.insecure;
    config
}

fn relay_config(config: &Config, credentials: &Credentials) -> RelayConfig {
    RelayConfig {
        server_address: config.server_address.clone(),
        access_key: credentials.key.clone(),
        access_secret: credentials.secret.clone(),
        insecure_skip_verify: config.insecure,
        health_timeout: Duration::from_secs(config.health_timeout_secs),
        reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        dispatch: DispatchConfig {
            workers: config.dispatch_workers,
            queue_capacity: config.dispatch_queue,
        },
    }
}

fn forwarder_config(config: &Config) -> ForwarderConfig {
    ForwarderConfig {
        retries: config.retries,
        insecure: config.insecure,
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        ..ForwarderConfig::default()
    }
}

/// Run the relay session until a shutdown signal or a terminal error.
pub(crate) async fn run(config: Config, credentials: Credentials, args: ForwardArgs) -> Result<(), Box<dyn Error>> {
    let buckets = sanitize_buckets(&args.buckets);
    if buckets.is_empty() {
        return Err("no buckets to forward, use --buckets or BUCKETS".into());
    }

    let config = apply_overrides(config, &args);
    config.validate()?;

    let forwarder = DefaultForwarder::new(forwarder_config(&config))?;
    let sink: Arc<dyn StatusSink> = if args.no_ack {
        Arc::new(LogStatusSink)
    } else {
        Arc::new(HttpStatusSink::new(
            &config.server_address,
            credentials.key.as_str(),
            credentials.secret.as_str(),
            config.insecure,
        )?)
    };

    info!(
        server = %config.server_address,
        buckets = ?buckets,
        retries = config.retries,
        insecure = config.insecure,
        workers = config.dispatch_workers,
        ack = !args.no_ack,
        "Starting webhook forwarding"
    );
    if config.insecure {
        warn!("TLS certificate verification is disabled");
    }

    let session = RelaySession::new(relay_config(&config, &credentials), Arc::new(forwarder), sink);
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    if let Err(e) = session.run(Filter::new(buckets), cancel).await {
        error!(error = %e, "Relay session ended with error");
        return Err(e.into());
    }

    info!("Forwarding stopped");
    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Received shutdown signal, exiting...");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
