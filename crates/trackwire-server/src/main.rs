//! # Trackwire Server
//!
//! Live-update push server for logistics entities.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! trackwire
//!
//! # Run with a config file
//! trackwire  # reads trackwire.toml / /etc/trackwire/trackwire.toml
//!
//! # Run with environment variables
//! TRACKWIRE_PORT=8080 TRACKWIRE_HOST=0.0.0.0 trackwire
//! ```

mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trackwire_core::StaticTokenVerifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackwire=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Trackwire server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // The standalone binary authenticates against the config token table.
    // Embedding deployments pass their platform verifier to `run_server`.
    if config.auth.dev_tokens.is_empty() {
        tracing::warn!("No dev_tokens configured; every handshake will be rejected");
    }
    let mut verifier = StaticTokenVerifier::new();
    for (token, identity) in &config.auth.dev_tokens {
        verifier = verifier.with_token(token.clone(), identity.clone());
    }

    // Start the server
    handlers::run_server(config, Arc::new(verifier)).await?;

    Ok(())
}
