//! Tracking server - HTTP ingestion and query endpoint for field-agent sessions
//!
//! Configuration is read from `--config`, then `CONFIG_FILE`, then built-in
//! defaults. Log level defaults to `info` and follows `RUST_LOG`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use route_tracker::config::{Config, StorageBackend};
use route_tracker::http::{start_server, TrackingApi};
use route_tracker::{JsonFileStore, MemoryStore, SessionStore, TrackingError};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// GPS session ingestion and query server
#[derive(Parser, Debug)]
#[command(name = "tracking-server", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Listen address, overrides `[server] listen`
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log at debug level when RUST_LOG is not set
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::load_from_path(path)?
        }
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    let listen = match args.listen {
        Some(addr) => addr,
        None => config.server.listen.parse().map_err(|e| {
            TrackingError::Config(format!("server.listen {:?}: {}", config.server.listen, e))
        })?,
    };

    let store: Box<dyn SessionStore> = match config.storage.backend {
        StorageBackend::File => Box::new(JsonFileStore::open(&config.storage.data_dir)?),
        StorageBackend::Memory => {
            warn!("Memory backend selected: sessions are lost on exit");
            Box::new(MemoryStore::new())
        }
    };

    info!(
        "tracking-server starting: listen={} backend={:?} utc_offset_hours={}",
        listen, config.storage.backend, config.tracking.utc_offset_hours
    );

    let api = Arc::new(TrackingApi::new(store, &config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Cannot listen for Ctrl-C: {}", e);
                // Keep the sender alive so the server keeps running.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    start_server(listen, api, shutdown_rx).await?;
    info!("tracking-server stopped");
    Ok(())
}
