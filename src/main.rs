//! Streaming reverse proxy (v1)
//!
//! Serves a small local application and forwards matching requests to
//! configured upstreams, streaming responses without buffering them.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request        ┌────────────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ trace / request id / timeout                      │
//!                           │        │                                           │
//!                           │        ▼                                           │
//!                           │  ┌────────────┐  no target  ┌───────────────────┐   │
//!                           │  │ dispatcher │────────────▶│ local application │   │
//!                           │  │ (predicate)│◀────────────│ X-Accel-Redirect? │   │
//!                           │  └─────┬──────┘             └───────────────────┘   │
//!                           │        │ target                                    │
//!                           │        ▼                                           │
//!                           │  ┌────────────┐   ┌──────────────────┐             │
//!                           │  │  executor  │──▶│ bridge producer  │◀────────────┼──── Upstream
//!                           │  └─────┬──────┘   └────────┬─────────┘             │
//!     Client Response       │        │ status+headers    │ bounded conduit       │
//!     ◀─────────────────────┼────────┴───────────────────┘                       │
//!                           └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streaming_proxy::config::{load_config, ProxyConfig};
use streaming_proxy::http::HttpServer;
use streaming_proxy::lifecycle::{listen_for_signals, Shutdown};

#[derive(Parser)]
#[command(name = "streaming-proxy")]
#[command(about = "Streaming reverse proxy in front of a local application", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override observability.log_level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "streaming_proxy={level},tower_http={level}",
                    level = config.observability.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("streaming-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        redirects = config.redirects.len(),
        bridge_capacity = config.bridge.capacity,
        connect_timeout_secs = config.timeouts.connect_secs,
        read_timeout_secs = config.timeouts.read_secs,
        "Configuration loaded"
    );

    // Bind TCP listener
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        "Listening for connections"
    );

    let shutdown = Shutdown::new();
    listen_for_signals(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.wait()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
