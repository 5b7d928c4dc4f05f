use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub expiry_sweep_interval_secs: Option<u64>,

    // Component sections
    pub store: Option<StoreConfig>,
    pub pubsub: Option<PubSubConfig>,
    pub priority: Option<PriorityConfig>,
    pub archive: Option<ArchiveConfig>,
    pub sync: Option<SyncConfig>,
    pub optimizer: Option<OptimizerConfig>,
    pub security: Option<SecurityConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub query_cache_size: Option<usize>,
    pub query_cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PubSubConfig {
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub history_size: Option<usize>,
    pub slow_subscriber_threshold_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TierConfig {
    pub poll_interval_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub require_ack: Option<bool>,
}

/// `[priority.urgent]`, `[priority.high]`, ...
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PriorityConfig {
    pub urgent: Option<TierConfig>,
    pub high: Option<TierConfig>,
    pub medium: Option<TierConfig>,
    pub low: Option<TierConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    pub retention_days: Option<u64>,
    pub max_entries: Option<usize>,
    pub sweep_interval_secs: Option<u64>,
    pub archive_after_days: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub device_id: Option<String>,
    /// "server", "client" or "lastModified"
    pub strategy: Option<String>,
    pub base_reconnect_delay_ms: Option<u64>,
    pub max_reconnect_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub heartbeat_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OptimizerConfig {
    pub throttle_threshold: Option<f64>,
    pub high_load_threshold: Option<f64>,
    pub target_processing_ms: Option<u64>,
    pub initial_batch_size: Option<usize>,
    pub min_batch_size: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub expiry_boost_window_ms: Option<i64>,
    pub cache_size: Option<usize>,
    pub sample_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub encryption_passphrase: Option<String>,
    pub argon2_memory_kib: Option<u32>,
    pub argon2_iterations: Option<u32>,
    pub session_ttl_secs: Option<u64>,
    pub permissions: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
