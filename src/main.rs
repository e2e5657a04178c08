//! boltmesh - Bolt v1 sidecar proxy
//!
//! Accepts Bolt RPC connections on each configured listener and proxies
//! decoded frames to the listener's upstream.

use boltmesh_server::{Config, ListenerAdapter};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if BOLTMESH_CONFIG is set, then env overrides)
    let config_path = std::env::var("BOLTMESH_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting boltmesh with {} listener(s)", config.listeners.len());

    let adapter = Arc::new(ListenerAdapter::new());
    for listener in config.listeners {
        let name = listener.name.clone();
        if let Err(e) = adapter.add_or_update_listener(listener).await {
            tracing::error!("Failed to start listener {}: {}", name, e);
            adapter.shutdown().await;
            return Err(e.into());
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping listeners...");
    adapter.shutdown().await;

    tracing::info!("Proxy stopped");
    Ok(())
}
