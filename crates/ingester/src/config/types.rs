use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tickvault_core::Channel;

use crate::application::config::{
    BackoffConfig, ConnectionConfig, MIN_CONNECT_INTERVAL, RecoveryConfig, default_channels,
};

/// Root configuration for the ingester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngesterConfigFile {
    pub feed: FeedConfig,
    /// Products subscribed at startup
    #[serde(default)]
    pub products: Vec<String>,
    /// Channels subscribed for every product
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub connection: ConnectionConfigJson,
    #[serde(default)]
    pub recovery: RecoveryConfigJson,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Exchange endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket feed URL
    pub ws_url: String,
    /// REST API base URL used for gap backfill
    pub rest_url: String,
}

/// Connection lifecycle timing (JSON representation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfigJson {
    #[serde(default = "default_min_connect_interval")]
    pub min_connect_interval_ms: u64,
    #[serde(default = "default_initial_connect_deadline")]
    pub initial_connect_deadline_ms: u64,
    #[serde(default = "default_subscribe_ack_timeout")]
    pub subscribe_ack_timeout_ms: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    #[serde(default = "default_reconcile_debounce")]
    pub reconcile_debounce_ms: u64,
}

impl Default for ConnectionConfigJson {
    fn default() -> Self {
        ConnectionConfigJson {
            min_connect_interval_ms: default_min_connect_interval(),
            initial_connect_deadline_ms: default_initial_connect_deadline(),
            subscribe_ack_timeout_ms: default_subscribe_ack_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
            reconcile_debounce_ms: default_reconcile_debounce(),
        }
    }
}

impl ConnectionConfigJson {
    /// Convert to application-layer ConnectionConfig
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .with_min_connect_interval(Duration::from_millis(self.min_connect_interval_ms))
            .with_initial_connect_deadline(Duration::from_millis(self.initial_connect_deadline_ms))
            .with_subscribe_ack_timeout(Duration::from_millis(self.subscribe_ack_timeout_ms))
            .with_backoff(BackoffConfig {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                multiplier: self.backoff_multiplier,
                jitter_factor: self.jitter_factor,
                floor: MIN_CONNECT_INTERVAL,
            })
            .with_reconcile_debounce(Duration::from_millis(self.reconcile_debounce_ms))
    }
}

/// Gap recovery policy (JSON representation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfigJson {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max")]
    pub retry_max_ms: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_max_held_messages")]
    pub max_held_messages: usize,
}

impl Default for RecoveryConfigJson {
    fn default() -> Self {
        RecoveryConfigJson {
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base(),
            retry_max_ms: default_retry_max(),
            fetch_timeout_ms: default_fetch_timeout(),
            max_held_messages: default_max_held_messages(),
        }
    }
}

impl RecoveryConfigJson {
    /// Convert to application-layer RecoveryConfig
    pub fn to_recovery_config(&self) -> RecoveryConfig {
        let defaults = RecoveryConfig::default();
        RecoveryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_retry_backoff(BackoffConfig {
                base: Duration::from_millis(self.retry_base_ms),
                max: Duration::from_millis(self.retry_max_ms),
                ..defaults.retry_backoff
            })
            .with_fetch_timeout(Duration::from_millis(self.fetch_timeout_ms))
            .with_max_held_messages(self.max_held_messages)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving one JSONL file per (channel, product)
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            directory: default_storage_directory(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

// Default value functions for serde
fn default_min_connect_interval() -> u64 {
    500
}

fn default_initial_connect_deadline() -> u64 {
    15_000
}

fn default_subscribe_ack_timeout() -> u64 {
    5_000
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_reconcile_debounce() -> u64 {
    50
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base() -> u64 {
    250
}

fn default_retry_max() -> u64 {
    5_000
}

fn default_fetch_timeout() -> u64 {
    10_000
}

fn default_max_held_messages() -> usize {
    10_000
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("data")
}
