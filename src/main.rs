//! STELLARUSH Crash Game Server
//!
//! Authoritative server for the crash betting game. One table, one
//! provably fair crash point sequence, any number of WebSocket clients.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stellarush::network::{GameServer, ServerConfig};
use stellarush::{BETTING_TIME_MS, TICK_INTERVAL_MS, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("STELLARUSH_BIND_ADDR") {
        config.bind_addr = addr
            .parse()
            .with_context(|| format!("Invalid STELLARUSH_BIND_ADDR: {}", addr))?;
    }

    info!("STELLARUSH Server v{}", VERSION);
    info!("Tick interval: {} ms", TICK_INTERVAL_MS);
    info!("Betting window: {} ms", BETTING_TIME_MS);

    let server = GameServer::new(config).context("Failed to start the game server")?;
    info!(
        "Server seed fingerprint: {}",
        seed_fingerprint(&server.seed_hex().await)
    );

    server.run().await.context("Server terminated with error")?;
    Ok(())
}

/// First bytes of the seed hash, enough to match logs against a later
/// full-seed disclosure without leaking the seed itself.
fn seed_fingerprint(seed_hex: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(seed_hex.as_bytes());
    hex::encode(&digest[..4])
}
