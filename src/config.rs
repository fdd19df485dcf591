use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_delivery_config")]
    pub delivery: DeliveryConfig,
    #[serde(default = "default_broadcast_config")]
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Users allowed to run the broadcast flow.
    #[serde(default)]
    pub admin_user_ids: Vec<u64>,
    /// Optional channel linked from the /start reply.
    #[serde(default)]
    pub channel_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl DeliveryConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    /// Pause between consecutive fan-out sends.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

impl BroadcastConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_pause_ms() -> u64 {
    100
}

fn default_delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        max_attempts: default_max_attempts(),
        base_backoff_ms: default_base_backoff_ms(),
    }
}

fn default_broadcast_config() -> BroadcastConfig {
    BroadcastConfig {
        pause_ms: default_pause_ms(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}
