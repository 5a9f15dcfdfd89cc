use anyhow::Result;
use proximity::config::{load_config, ProximityConfig};
use proximity::server::{wait_for_shutdown_signal, Server};
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proximity=info".into()),
        )
        .init();

    info!("Proximity server starting...");

    // Config path: first argument, then PROXIMITY_CONFIG, else built-in defaults
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROXIMITY_CONFIG").ok())
        .map(PathBuf::from);

    let config = match config_path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            load_config(&path)?
        }
        None => {
            info!("No config file given, using defaults");
            ProximityConfig::default()
        }
    }
    .apply_env();

    let server = Server::bind(config).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => shutdown.cancel(),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    server.run().await
}
