//! S/4HANA OData integration proxy
//!
//! Fronts an SAP S/4HANA system with a plain JSON API. Every backend call
//! goes through one bounded dispatcher; writes carry a cached CSRF token.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────────────┐
//!                     │                       S4 PROXY                            │
//!                     │                                                           │
//!   Client Request    │  ┌─────────┐    ┌──────────┐    ┌─────────────────┐       │
//!   ──────────────────┼─▶│  http   │───▶│ backend  │───▶│   resilience    │       │
//!                     │  │ server  │    │ S4Client │    │ executor/retry  │       │
//!                     │  └─────────┘    └────┬─────┘    └───────┬─────────┘       │
//!                     │                      │                  │                 │
//!                     │                      ▼                  ▼                 │
//!                     │               ┌────────────┐    ┌─────────────────┐       │
//!                     │               │    csrf    │───▶│   dispatcher    │       │
//!                     │               │ token cache│    │ (N call slots)  │       │
//!                     │               └────────────┘    └───────┬─────────┘       │
//!                     │                                         │                 │
//!   Client Response   │  ┌─────────┐    ┌──────────┐    ┌───────▼─────────┐       │
//!   ◀─────────────────┼──│  odata  │◀───│ backend  │◀───│    transport    │◀──────┼── S/4HANA
//!                     │  │simplify │    │ response │    │    (reqwest)    │       │
//!                     │  └─────────┘    └──────────┘    └─────────────────┘       │
//!                     │                                                           │
//!                     │  ┌─────────┐ ┌──────────────┐ ┌─────────┐ ┌───────────┐   │
//!                     │  │ config  │ │observability │ │  admin  │ │ lifecycle │   │
//!                     │  └─────────┘ └──────────────┘ └─────────┘ └───────────┘   │
//!                     └───────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use s4_proxy::config::loader::load_config;
use s4_proxy::observability::{logging, metrics};
use s4_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "s4-proxy")]
#[command(about = "OData integration proxy for SAP S/4HANA", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init_logging(&config.observability);

    tracing::info!("s4-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.base_url,
        max_concurrent = config.dispatcher.max_concurrent,
        max_attempts = config.retries.max_attempts,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(shutdown.clone().trigger_on_ctrl_c());

    server.run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
