//! API gateway for the housing platform services.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────────┐
//!                        │                    API GATEWAY                     │
//!                        │                                                    │
//!     Client Request     │  ┌──────────┐   ┌─────────┐   ┌───────────────┐    │
//!     ───────────────────┼─▶│  global  │──▶│ routing │──▶│   pipeline    │    │
//!                        │  │middleware│   │  table  │   │ rate limit    │    │
//!                        │  └──────────┘   └─────────┘   │ breaker       │    │
//!                        │                               │ authenticate  │    │
//!                        │                               └───────┬───────┘    │
//!                        │                                       ▼            │
//!     Client Response    │                               ┌───────────────┐    │
//!     ◀──────────────────┼───────────────────────────────│   forwarder   │◀───┼──── Backend
//!                        │                               │ (round-robin) │    │     Service
//!                        │                               └───────────────┘    │
//!                        │                                                    │
//!                        │  ┌──────────────────────────────────────────────┐  │
//!                        │  │            Cross-Cutting Concerns            │  │
//!                        │  │  config · counter store · observability ·    │  │
//!                        │  │  lifecycle (signals, drain)                  │  │
//!                        │  └──────────────────────────────────────────────┘  │
//!                        └────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, ObservabilityConfig};
use api_gateway::http::{ErrorClass, GatewayServer};
use api_gateway::lifecycle::{wait_for_signal, Shutdown};
use api_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "Request-routing gateway in front of the backend services", long_about = None)]
struct Args {
    /// TOML configuration file; defaults and environment apply without one.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(
                error = %e,
                class = ErrorClass::ConfigurationFailure.as_str(),
                "Invalid configuration"
            );
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!("api-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        routes = config.routes.len(),
        store = ?config.store.kind,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = GatewayServer::new(config)?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal(&shutdown).await;
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
