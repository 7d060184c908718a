//! Configuration management for metastate.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local node identifier
    #[serde(default = "default_node_id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the persisted metadata (`_state/`, `indices/`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Update cycles slower than this are logged at warn level
    #[serde(default = "default_slow_write_logging_threshold_ms")]
    pub slow_write_logging_threshold_ms: u64,

    /// Start with incremental writes enabled. A node normally starts with a
    /// full write and switches to incremental after its first applied state.
    #[serde(default)]
    pub incremental_write: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "metastate-node-01".to_string())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/metastate")
}

fn default_slow_write_logging_threshold_ms() -> u64 {
    10_000 // 10s
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig { id: default_node_id() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            slow_write_logging_threshold_ms: default_slow_write_logging_threshold_ms(),
            incremental_write: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl WriterConfig {
    pub fn slow_write_logging_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_write_logging_threshold_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override file values with `METASTATE_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("METASTATE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("METASTATE_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(id) = lookup("METASTATE_NODE_ID") {
            self.node.id = id;
        }
    }
}
