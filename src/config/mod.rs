use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::subscription::DEFAULT_SUBSCRIBER_BUFFER;

/// Complete server configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProximityConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Sensor-facing TCP listener
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_bind")]
    pub bind: String,
    /// Longest accepted message line; longer lines close the connection
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Close sensor connections silent for this long (unset = never)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

fn default_ingest_bind() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_max_frame_bytes() -> usize {
    4096
}

impl IngestConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: default_ingest_bind(),
            max_frame_bytes: default_max_frame_bytes(),
            idle_timeout_secs: None,
        }
    }
}

/// Dashboard-facing WebSocket listener
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_subscription_bind")]
    pub bind: String,
    #[serde(default = "default_subscription_path")]
    pub path: String,
    /// Snapshots buffered per subscriber before the oldest are dropped
    #[serde(default = "default_subscriber_buffer")]
    pub buffer: usize,
}

fn default_subscription_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_subscription_path() -> String {
    "/sensors".to_string()
}

fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            bind: default_subscription_bind(),
            path: default_subscription_path(),
            buffer: default_subscriber_buffer(),
        }
    }
}

/// Append-only reading log
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_path")]
    pub path: PathBuf,
}

fn default_persistence_path() -> PathBuf {
    PathBuf::from("sensor_data.csv")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_persistence_path(),
        }
    }
}

/// Graceful shutdown
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long in-flight connections get to finish before being aborted
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_grace_secs() -> u64 {
    5
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

impl ProximityConfig {
    /// Override endpoints and paths from env vars, when set.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("PROXIMITY_INGEST_BIND") {
            self.ingest.bind = v;
        }
        if let Ok(v) = std::env::var("PROXIMITY_SUBSCRIPTION_BIND") {
            self.subscription.bind = v;
        }
        if let Ok(v) = std::env::var("PROXIMITY_PERSISTENCE_PATH") {
            self.persistence.path = PathBuf::from(v);
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<ProximityConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ProximityConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
