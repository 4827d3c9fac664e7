//! Periscope Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - PERISCOPE_HOST: Bind address (default: 0.0.0.0)
//! - PERISCOPE_PORT: Port number (default: 8080)
//! - PERISCOPE_STORE: Store backend, "memory" or "document" (default: memory)
//! - PERISCOPE_DATA_PATH: Document store file (default: periscope.db)
//! - PERISCOPE_TTL_SWEEP_SECS: Expiry sweep interval (default: 60)
//! - RUST_LOG: Log level (default: info)

use periscope::api::{run_server, ServerConfig, StoreBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "periscope=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse configuration from environment
    let host = std::env::var("PERISCOPE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PERISCOPE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let sweep_interval_secs = std::env::var("PERISCOPE_TTL_SWEEP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let backend = match std::env::var("PERISCOPE_STORE").as_deref() {
        Ok("document") => {
            let path = std::env::var("PERISCOPE_DATA_PATH")
                .unwrap_or_else(|_| "periscope.db".to_string());
            StoreBackend::Document { path: path.into() }
        }
        _ => StoreBackend::Memory,
    };

    let config = ServerConfig {
        host,
        port,
        backend,
        sweep_interval_secs,
    };

    tracing::info!("Periscope configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Store backend: {:?}", config.backend);
    tracing::info!("  TTL sweep interval: {} seconds", config.sweep_interval_secs);

    run_server(config).await
}
