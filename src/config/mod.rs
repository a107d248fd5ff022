//! # Configuration
//!
//! Two layers of configuration feed the console:
//!
//! - [`Config`], the application config read from `config.toml`: node name,
//!   where the store lives and how much it keeps, logging, and poll-loop timing.
//! - [`radio::MeshcoreSettings`], the radio settings edited at runtime and
//!   persisted in the store's settings tree. See the [`radio`] module.
//!
//! ```toml
//! [node]
//! name = "uconsole-node"
//!
//! [storage]
//! data_dir = "./data"
//! max_messages = 500
//! max_packets = 1000
//! dedup_window = 100
//!
//! [logging]
//! level = "info"
//! # file = "meshcore-console.log"
//!
//! [runtime]
//! poll_interval_ms = 250
//! poll_batch = 50
//! connect_timeout_secs = 8
//! disconnect_timeout_secs = 10
//! telemetry_timeout_secs = 15
//! event_history = 500
//! correlation_capacity = 20
//! ```
//!
//! Every section is optional; missing keys take their defaults.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub mod radio;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "uconsole-node".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub max_messages: usize,
    pub max_packets: usize,
    /// Number of recent messages checked for a repeated message id.
    pub dedup_window: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            max_messages: crate::storage::DEFAULT_MAX_MESSAGES,
            max_packets: crate::storage::DEFAULT_MAX_PACKETS,
            dedup_window: crate::state::DEFAULT_DEDUP_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub poll_interval_ms: u64,
    /// Most events drained from the session per poll.
    pub poll_batch: usize,
    pub connect_timeout_secs: u64,
    pub disconnect_timeout_secs: u64,
    pub telemetry_timeout_secs: u64,
    /// Events kept in memory for `list_recent_events`.
    pub event_history: usize,
    /// Capacity of each enrichment correlation queue.
    pub correlation_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            poll_batch: 50,
            connect_timeout_secs: 8,
            disconnect_timeout_secs: 10,
            telemetry_timeout_secs: 15,
            event_history: 500,
            correlation_capacity: crate::meshcore::enrich::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_takes_defaults() {
        let config: Config = toml::from_str("[node]\nname = \"ridge\"\n[runtime]\npoll_batch = 5\n").unwrap();
        assert_eq!(config.node.name, "ridge");
        assert_eq!(config.runtime.poll_batch, 5);
        assert_eq!(config.runtime.poll_interval_ms, 250);
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn default_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
