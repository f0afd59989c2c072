//! Tandem Relay Server
//!
//! Matchmaking and signaling relay for one-to-one peer-to-peer sessions.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tandem::{ServerConfig, SignalServer, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("reading configuration")?;
    config.validate().context("invalid configuration")?;

    info!("Tandem Relay Server v{}", VERSION);
    info!("Max connections: {}", config.max_connections);
    if !config.blocked_words.is_empty() {
        info!(
            "Chat moderation: {} blocked words, {} strikes",
            config.blocked_words.len(),
            config.moderation_strikes
        );
    }

    let server = SignalServer::new(config);
    let running = server.run();
    tokio::pin!(running);

    tokio::select! {
        result = &mut running => {
            return result.context("server error");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            server.shutdown();
        }
    }

    // Let open connections unregister and notify their partners.
    running.await.context("server error during shutdown")?;
    info!("Shutdown complete");

    Ok(())
}
