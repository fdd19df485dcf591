mod bot;
mod broadcast;
mod config;
mod content;
mod delivery;
mod ledger;
mod platform;
mod reconcile;
mod registry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bizrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Admins: {:?}", config.telegram.admin_user_ids);
    info!(
        "  Delivery: {} attempts, {}ms base backoff",
        config.delivery.max_attempts, config.delivery.base_backoff_ms
    );

    // Run the Telegram bot
    info!("Bot is starting...");
    bot::run(config).await?;

    Ok(())
}
