//! # Vigil Server
//!
//! Bridges an alarm's MQTT topics to WebSocket clients.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! vigil
//!
//! # Run with custom config
//! vigil --config /path/to/vigil.toml
//!
//! # Run with environment variables
//! VIGIL__BROKER__HOST=mqtt.local VIGIL_PORT=8080 vigil
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, StoreBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_core::{Bridge, CommandValidator, FileStore, MemoryStore, RecordStore};
use vigil_protocol::SUBSCRIBED_TOPICS;

/// Alarm bridge between an MQTT broker and WebSocket clients.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file; skips the default search and env overrides.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=debug,vigil_core=debug,vigil_mqtt=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting Vigil server on {}:{}", config.host, config.port);
    tracing::debug!(broker = ?config.broker, "Broker settings");

    // Initialize metrics
    metrics::init_metrics();

    let store = open_store(&config).await?;
    let shutdown = CancellationToken::new();

    let (broker, connection) = vigil_mqtt::connect(config.broker.clone(), &SUBSCRIBED_TOPICS);
    let bridge = Bridge::start(
        store,
        Arc::new(broker),
        CommandValidator::default(),
        config.bridge_config(),
    );

    let (events_tx, events_rx) = mpsc::channel(config.broker.event_buffer.max(1));
    let mqtt_task = tokio::spawn(connection.run(events_tx, shutdown.clone()));
    let bridge_task = tokio::spawn(bridge.clone().run(events_rx, shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    // Start the server
    let result = handlers::run_server(config, bridge, shutdown.clone()).await;

    shutdown.cancel();
    let _ = tokio::join!(mqtt_task, bridge_task);

    tracing::info!("Vigil server stopped");
    result
}

async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!(retention = config.store.retention, "Using in-memory record store");
            Arc::new(MemoryStore::with_retention(config.store.retention))
        }
        StoreBackend::File => {
            let store = FileStore::open(&config.store.path).await.with_context(|| {
                format!("Failed to open record store {}", config.store.path.display())
            })?;
            tracing::info!(path = %config.store.path.display(), "Using file record store");
            Arc::new(store)
        }
    })
}
