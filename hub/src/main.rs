//! Burrowcam Hub – receives motion clips and heartbeats from field nodes,
//! files clips per node and day, and keeps a SQLite registry of node
//! health for the nodes listing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use burrowcam_common::config::HubConfig;

const DEFAULT_CONFIG_PATH: &str = "/etc/burrowcam/hub.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = HubConfig::load(&PathBuf::from(&config_path)).context("Config load failed")?;

    info!(
        "Burrowcam hub starting (v{}, listen={}, {} node token(s))",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr,
        config.auth_tokens.len()
    );

    // ── ctrl-c ───────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
        info!("Shutdown signal received");
    })
    .context("Cannot set Ctrl-C handler")?;

    burrowcam_hub::server::run(config, shutdown).await?;

    info!("Burrowcam hub stopped");
    Ok(())
}
