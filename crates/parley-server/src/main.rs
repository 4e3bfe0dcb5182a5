//! # Parley Server
//!
//! Realtime chat routing server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with custom config
//! parley --config /path/to/parley.toml
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley
//! ```

use anyhow::{bail, Result};
use parley_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut args = std::env::args().skip(1);
    let config = match (args.next().as_deref(), args.next()) {
        (None, _) => Config::load()?,
        (Some("--config"), Some(path)) => Config::from_file(path)?,
        (Some(arg), _) => bail!("Unexpected argument: {}", arg),
    };

    tracing::info!(
        users = config.users.len(),
        rooms = config.rooms.len(),
        "Starting Parley server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
