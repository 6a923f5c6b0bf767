//! space-proxy
//!
//! Forwards HTTP requests and WebSocket sessions from a local port to one
//! fixed upstream, presenting a browser identity to it.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                 space-proxy                   │
//!   Client Request        │  ┌──────────┐     ┌───────────────┐           │
//!   ──────────────────────┼─▶│ dispatch │──┬─▶│  HTTP relay   │───────────┼──▶ https://<upstream>
//!                         │  └──────────┘  │  └───────────────┘           │
//!                         │       │        │  ┌───────────────┐           │
//!                         │       │        └─▶│ WebSocket     │◀─────────▶┼──▶ wss://<upstream>
//!                         │       ▼           │ bridge        │           │
//!                         │  ┌──────────┐     └───────────────┘           │
//!                         │  │ disguise │  User-Agent / Host / Origin     │
//!                         │  └──────────┘                                 │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use space_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use space_proxy::lifecycle::{signals, Shutdown};
use space_proxy::observability::{logging, metrics};
use space_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "space-proxy")]
#[command(about = "Reverse proxy for HTTP and WebSocket traffic to a single upstream", long_about = None)]
struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability)?;

    let port = config.listener.port;
    tracing::info!(port, upstream = %config.upstream.host, "Starting proxy server");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(config.listener.bind_address()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Listening on http://localhost:{}", local_addr.port());

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config)?;

    tokio::spawn(signals::forward_signals(shutdown));
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
