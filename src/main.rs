//! Caching reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                    CACHE PROXY                        │
//!                         │                                                       │
//!   Client Request        │  ┌─────────┐    ┌──────────────┐    ┌─────────────┐  │
//!   ──────────────────────┼─▶│  http   │───▶│ orchestrator │───▶│ cache store │  │
//!   /cache/{proto}/{url}  │  │ server  │    │              │◀───│  (on disk)  │  │
//!                         │  └─────────┘    └──────┬───────┘    └──────▲──────┘  │
//!                         │                        │ miss              │ persist │
//!                         │                        ▼                   │         │
//!   Client Response       │  ┌─────────┐    ┌──────────────┐    ┌──────┴──────┐  │
//!   ◀─────────────────────┼──│  relay  │◀───│   fetcher    │◀───│   origin    │◀─┼── Origin
//!                         │  │ stream  │    │ (raw / gzip) │    │   response  │  │
//!                         │  └─────────┘    └──────────────┘    └─────────────┘  │
//!                         │                                                       │
//!                         │   fallback placeholder when nothing else answers      │
//!                         └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use cache_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use cache_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use cache_proxy::observability::{logging, metrics};
use cache_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "cache-proxy")]
#[command(about = "Streaming reverse proxy with an on-disk response cache", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, keeping the configured host.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Directory for cache entries.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

impl Cli {
    fn resolve_config(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.listener.set_port(port);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.dir = dir.clone();
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    logging::init_logging(&config.observability);

    tracing::info!("cache-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache_dir = %config.cache.dir.display(),
        fetch_timeout_secs = config.upstream.fetch_timeout_secs,
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

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
