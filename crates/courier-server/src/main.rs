//! # Courier Server
//!
//! Per-user server-sent events with heartbeats and a periodic timestamp
//! broadcast.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with a specific config file
//! COURIER_CONFIG=/path/to/courier.toml courier
//!
//! # Run with environment overrides
//! COURIER_PORT=8080 COURIER_HOST=0.0.0.0 COURIER_TICKER__INTERVAL_MS=1000 courier
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_core=debug,courier_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
