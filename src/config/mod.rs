mod file_config;

pub use file_config::{
    ArchiveConfig, FileConfig, OptimizerConfig, PriorityConfig, PubSubConfig, SecurityConfig,
    StoreConfig, SyncConfig, TierConfig,
};

use crate::notifications::Priority;
use crate::server::RequestsLoggingLevel;
use crate::sync::ConflictStrategy;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub expiry_sweep_interval_secs: u64,
    pub device_id: Option<String>,
    pub encryption_passphrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    /// `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub expiry_sweep_interval_secs: u64,

    // Component settings (with defaults)
    pub store: StoreSettings,
    pub pubsub: PubSubSettings,
    pub priority: PrioritySettings,
    pub archive: ArchiveSettings,
    pub sync: SyncSettings,
    pub optimizer: OptimizerSettings,
    pub security: SecuritySettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file.db_path.map(PathBuf::from).or_else(|| cli.db_path.clone());
        if let Some(parent) = db_path.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let port = file.port.unwrap_or(cli.port);
        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());
        let expiry_sweep_interval_secs = file
            .expiry_sweep_interval_secs
            .unwrap_or(cli.expiry_sweep_interval_secs);

        let store_file = file.store.unwrap_or_default();
        let store_defaults = StoreSettings::default();
        let store = StoreSettings {
            query_cache_size: store_file
                .query_cache_size
                .unwrap_or(store_defaults.query_cache_size),
            query_cache_ttl_ms: store_file
                .query_cache_ttl_ms
                .unwrap_or(store_defaults.query_cache_ttl_ms),
        };

        let ps_file = file.pubsub.unwrap_or_default();
        let ps = PubSubSettings::default();
        let pubsub = PubSubSettings {
            batch_size: ps_file.batch_size.unwrap_or(ps.batch_size),
            batch_delay_ms: ps_file.batch_delay_ms.unwrap_or(ps.batch_delay_ms),
            max_retries: ps_file.max_retries.unwrap_or(ps.max_retries),
            base_delay_ms: ps_file.base_delay_ms.unwrap_or(ps.base_delay_ms),
            backoff_factor: ps_file.backoff_factor.unwrap_or(ps.backoff_factor),
            max_delay_ms: ps_file.max_delay_ms.unwrap_or(ps.max_delay_ms),
            history_size: ps_file.history_size.unwrap_or(ps.history_size),
            slow_subscriber_threshold_ms: ps_file
                .slow_subscriber_threshold_ms
                .unwrap_or(ps.slow_subscriber_threshold_ms),
        };
        if pubsub.batch_size == 0 {
            bail!("pubsub.batch_size must be at least 1");
        }
        if pubsub.backoff_factor < 1.0 {
            bail!(
                "pubsub.backoff_factor must be >= 1.0, got {}",
                pubsub.backoff_factor
            );
        }

        let prio_file = file.priority.unwrap_or_default();
        let priority = PrioritySettings {
            urgent: TierSettings::merge(Priority::Urgent, prio_file.urgent),
            high: TierSettings::merge(Priority::High, prio_file.high),
            medium: TierSettings::merge(Priority::Medium, prio_file.medium),
            low: TierSettings::merge(Priority::Low, prio_file.low),
        };

        let ar_file = file.archive.unwrap_or_default();
        let ar = ArchiveSettings::default();
        let archive = ArchiveSettings {
            retention_days: ar_file.retention_days.unwrap_or(ar.retention_days),
            max_entries: ar_file.max_entries.unwrap_or(ar.max_entries),
            sweep_interval_secs: ar_file.sweep_interval_secs.unwrap_or(ar.sweep_interval_secs),
            archive_after_days: ar_file.archive_after_days.unwrap_or(ar.archive_after_days),
        };

        let sync_file = file.sync.unwrap_or_default();
        let sy = SyncSettings::default();
        let strategy = match sync_file.strategy {
            Some(s) => match ConflictStrategy::parse(&s) {
                Some(strategy) => strategy,
                None => bail!("Unknown sync strategy: {}", s),
            },
            None => sy.strategy,
        };
        let sync = SyncSettings {
            device_id: sync_file
                .device_id
                .or_else(|| cli.device_id.clone())
                .unwrap_or(sy.device_id),
            strategy,
            base_reconnect_delay_ms: sync_file
                .base_reconnect_delay_ms
                .unwrap_or(sy.base_reconnect_delay_ms),
            max_reconnect_delay_ms: sync_file
                .max_reconnect_delay_ms
                .unwrap_or(sy.max_reconnect_delay_ms),
            max_reconnect_attempts: sync_file
                .max_reconnect_attempts
                .unwrap_or(sy.max_reconnect_attempts),
            heartbeat_interval_secs: sync_file
                .heartbeat_interval_secs
                .unwrap_or(sy.heartbeat_interval_secs),
        };

        let opt_file = file.optimizer.unwrap_or_default();
        let op = OptimizerSettings::default();
        let optimizer = OptimizerSettings {
            throttle_threshold: opt_file.throttle_threshold.unwrap_or(op.throttle_threshold),
            high_load_threshold: opt_file
                .high_load_threshold
                .unwrap_or(op.high_load_threshold),
            target_processing_ms: opt_file
                .target_processing_ms
                .unwrap_or(op.target_processing_ms),
            initial_batch_size: opt_file.initial_batch_size.unwrap_or(op.initial_batch_size),
            min_batch_size: opt_file.min_batch_size.unwrap_or(op.min_batch_size),
            max_batch_size: opt_file.max_batch_size.unwrap_or(op.max_batch_size),
            expiry_boost_window_ms: opt_file
                .expiry_boost_window_ms
                .unwrap_or(op.expiry_boost_window_ms),
            cache_size: opt_file.cache_size.unwrap_or(op.cache_size),
            sample_interval_ms: opt_file.sample_interval_ms.unwrap_or(op.sample_interval_ms),
        };
        if optimizer.min_batch_size == 0 || optimizer.min_batch_size > optimizer.max_batch_size {
            bail!(
                "optimizer batch bounds are invalid: min {} max {}",
                optimizer.min_batch_size,
                optimizer.max_batch_size
            );
        }

        let sec_file = file.security.unwrap_or_default();
        let se = SecuritySettings::default();
        let security = SecuritySettings {
            encryption_passphrase: sec_file
                .encryption_passphrase
                .or_else(|| cli.encryption_passphrase.clone()),
            argon2_memory_kib: sec_file.argon2_memory_kib.unwrap_or(se.argon2_memory_kib),
            argon2_iterations: sec_file.argon2_iterations.unwrap_or(se.argon2_iterations),
            session_ttl_secs: sec_file.session_ttl_secs.unwrap_or(se.session_ttl_secs),
            permissions: sec_file.permissions.unwrap_or(se.permissions),
        };

        Ok(Self {
            db_path,
            port,
            logging_level,
            expiry_sweep_interval_secs,
            store,
            pubsub,
            priority,
            archive,
            sync,
            optimizer,
            security,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub query_cache_size: usize,
    pub query_cache_ttl_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            query_cache_size: 100,
            query_cache_ttl_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PubSubSettings {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Number of events kept in delivery history.
    pub history_size: usize,
    pub slow_subscriber_threshold_ms: u64,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 50,
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            history_size: 1_000,
            slow_subscriber_threshold_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierSettings {
    pub poll_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub require_ack: bool,
}

impl TierSettings {
    pub fn default_for(priority: Priority) -> Self {
        let (poll_interval_ms, ack_timeout_ms, max_retries, retry_delay_ms) = match priority {
            Priority::Urgent => (100, 5_000, 5, 100),
            Priority::High => (500, 10_000, 3, 500),
            Priority::Medium => (1_000, 30_000, 2, 1_000),
            Priority::Low => (2_000, 60_000, 1, 2_000),
        };
        Self {
            poll_interval_ms,
            ack_timeout_ms,
            max_retries,
            retry_delay_ms,
            require_ack: false,
        }
    }

    fn merge(priority: Priority, file: Option<TierConfig>) -> Self {
        let defaults = Self::default_for(priority);
        let file = file.unwrap_or_default();
        Self {
            poll_interval_ms: file.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            ack_timeout_ms: file.ack_timeout_ms.unwrap_or(defaults.ack_timeout_ms),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_ms: file.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            require_ack: file.require_ack.unwrap_or(defaults.require_ack),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrioritySettings {
    pub urgent: TierSettings,
    pub high: TierSettings,
    pub medium: TierSettings,
    pub low: TierSettings,
}

impl PrioritySettings {
    pub fn tier(&self, priority: Priority) -> &TierSettings {
        match priority {
            Priority::Urgent => &self.urgent,
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    pub fn tier_mut(&mut self, priority: Priority) -> &mut TierSettings {
        match priority {
            Priority::Urgent => &mut self.urgent,
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            urgent: TierSettings::default_for(Priority::Urgent),
            high: TierSettings::default_for(Priority::High),
            medium: TierSettings::default_for(Priority::Medium),
            low: TierSettings::default_for(Priority::Low),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub retention_days: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
    /// Read notifications older than this are moved from the store into the archive.
    pub archive_after_days: u64,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_entries: 10_000,
            sweep_interval_secs: 3_600,
            archive_after_days: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub device_id: String,
    pub strategy: ConflictStrategy,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            device_id: "server".to_string(),
            strategy: ConflictStrategy::LastModified,
            base_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub throttle_threshold: f64,
    pub high_load_threshold: f64,
    pub target_processing_ms: u64,
    pub initial_batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub expiry_boost_window_ms: i64,
    pub cache_size: usize,
    pub sample_interval_ms: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            throttle_threshold: 0.9,
            high_load_threshold: 0.75,
            target_processing_ms: 100,
            initial_batch_size: 10,
            min_batch_size: 1,
            max_batch_size: 100,
            expiry_boost_window_ms: 60 * 60 * 1000,
            cache_size: 1_000,
            sample_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub encryption_passphrase: Option<String>,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    /// Lifetime of the sessions the server opens per request or push connection.
    pub session_ttl_secs: u64,
    /// Read permissions granted to those sessions.
    pub permissions: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            encryption_passphrase: None,
            argon2_memory_kib: 19_456,
            argon2_iterations: 2,
            session_ttl_secs: 24 * 60 * 60,
            permissions: crate::security::READ_PERMISSIONS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
