//! Configuration for shardkeeper components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SHARDKEEPER_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "shardkeeper.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator instance ID (used in logs)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Coordinator tuning
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "coordinator-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: CoordinatorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the file named by `SHARDKEEPER_CONFIG`
    /// (default `shardkeeper.toml`), then `SHARDKEEPER__*` environment
    /// overrides. A missing file yields defaults.
    pub fn try_load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix("SHARDKEEPER").separator("__"))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.coordinator.validate()?;
        Ok(config)
    }

    /// Like [`Config::try_load`], falling back to defaults on error.
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring configuration: {}", e);
                Self::default()
            }
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Attempts for a conditional transaction before `ConcurrentModification`
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: usize,

    /// First backoff after a version conflict
    #[serde(default = "default_cas_backoff")]
    pub cas_backoff_ms: u64,

    /// Backoff ceiling for version conflicts
    #[serde(default = "default_cas_backoff_max")]
    pub cas_backoff_max_ms: u64,

    /// First backoff while a shard has no eligible replica
    #[serde(default = "default_election_backoff")]
    pub election_backoff_ms: u64,

    /// Backoff ceiling for pending elections
    #[serde(default = "default_election_backoff_max")]
    pub election_backoff_max_ms: u64,

    /// How long a graceful unload waits for a recovering replica
    #[serde(default = "default_recovery_grace")]
    pub recovery_grace_ms: u64,

    /// Timeout applied to every node runtime call
    #[serde(default = "default_node_timeout")]
    pub node_timeout_ms: u64,

    /// Capacity of the store event channel
    #[serde(default = "default_watch_buffer")]
    pub watch_buffer: usize,

    /// Timeout used by convergence helpers when the caller has none
    #[serde(default = "default_wait_timeout")]
    pub default_wait_timeout_ms: u64,
}

fn default_cas_max_attempts() -> usize {
    32
}
fn default_cas_backoff() -> u64 {
    2
}
fn default_cas_backoff_max() -> u64 {
    200
}
fn default_election_backoff() -> u64 {
    10
}
fn default_election_backoff_max() -> u64 {
    2_000
}
fn default_recovery_grace() -> u64 {
    30_000
}
fn default_node_timeout() -> u64 {
    15_000
}
fn default_watch_buffer() -> usize {
    1024
}
fn default_wait_timeout() -> u64 {
    45_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cas_max_attempts: default_cas_max_attempts(),
            cas_backoff_ms: default_cas_backoff(),
            cas_backoff_max_ms: default_cas_backoff_max(),
            election_backoff_ms: default_election_backoff(),
            election_backoff_max_ms: default_election_backoff_max(),
            recovery_grace_ms: default_recovery_grace(),
            node_timeout_ms: default_node_timeout(),
            watch_buffer: default_watch_buffer(),
            default_wait_timeout_ms: default_wait_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cas_max_attempts == 0 {
            return Err(Error::InvalidConfig("cas_max_attempts must be > 0".into()));
        }
        if self.cas_backoff_max_ms < self.cas_backoff_ms {
            return Err(Error::InvalidConfig(
                "cas_backoff_max_ms is below cas_backoff_ms".into(),
            ));
        }
        if self.election_backoff_ms == 0 || self.election_backoff_max_ms < self.election_backoff_ms
        {
            return Err(Error::InvalidConfig(
                "election backoff must be > 0 and below its ceiling".into(),
            ));
        }
        if self.watch_buffer == 0 {
            return Err(Error::InvalidConfig("watch_buffer must be > 0".into()));
        }
        Ok(())
    }

    pub fn cas_backoff(&self) -> Duration {
        Duration::from_millis(self.cas_backoff_ms)
    }

    pub fn cas_backoff_max(&self) -> Duration {
        Duration::from_millis(self.cas_backoff_max_ms)
    }

    pub fn election_backoff(&self) -> Duration {
        Duration::from_millis(self.election_backoff_ms)
    }

    pub fn election_backoff_max(&self) -> Duration {
        Duration::from_millis(self.election_backoff_max_ms)
    }

    pub fn recovery_grace(&self) -> Duration {
        Duration::from_millis(self.recovery_grace_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.default_wait_timeout_ms)
    }
}
