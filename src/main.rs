//! statsd daemon
//!
//! Receives metrics over UDP, aggregates them and flushes to Graphite
//! and/or Ganglia on a fixed interval. Configured through `STATSD_*`
//! environment variables and an optional TOML file (see
//! `statsd_rs::production::config`).

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;

use statsd_rs::observability::{init_tracing, LogConfig};
use statsd_rs::production::{configured_sinks, AggregatorConfig, ServerError, StatsdServer};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AggregatorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("statsd: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&LogConfig::from_env(config.debug)) {
        eprintln!("statsd: cannot initialize logging: {}", e);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AggregatorConfig) -> Result<(), ServerError> {
    let sinks = configured_sinks(&config).await?;
    let server = StatsdServer::bind(config, sinks).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                on_signal.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    server.run(shutdown).await
}
