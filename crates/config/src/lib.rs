//! Strom Configuration
//!
//! TOML-based configuration loading with sensible defaults. Minimal config
//! should just work - only specify what you need to change.
//!
//! Beyond the reserved `[global]` and `[log]` tables, every top-level table
//! declares one plugin instance. The table name is the instance name; the
//! mandatory `type` key names a registered plugin.
//!
//! # Example
//!
//! ```toml
//! [global]
//! pool_size = 200
//!
//! [tcp]
//! type = "TcpInput"
//! address = "127.0.0.1:5565"
//! decoder = "proto"
//!
//! [proto]
//! type = "ProtobufDecoder"
//!
//! [counter]
//! type = "CounterFilter"
//! message_matcher = "Type != 'strom.counter-output'"
//! ticker_interval = 5
//!
//! [log_file]
//! type = "FileOutput"
//! message_matcher = "TRUE"
//! path = "/var/log/strom/out.log"
//!
//! [log_file.retries]
//! max_delay = "10s"
//! delay = "100ms"
//! max_retries = 4
//! ```

mod error;
mod global;
mod logging;
mod plugins;
mod retries;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use error::{ConfigError, Result};
pub use global::GlobalConfig;
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use plugins::PluginInstanceConfig;
pub use retries::RetryOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings (pool size, channel sizes, etc.)
    pub global: GlobalConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// One entry per plugin instance table, keyed by instance name.
    /// BTreeMap keeps startup ordering deterministic.
    #[serde(flatten)]
    pub plugins: BTreeMap<String, PluginInstanceConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation; plugin-type and matcher validation happens in
    /// the pipeline builder where the registry is known.
    fn validate(&self) -> Result<()> {
        self.global.validate()?;
        for (name, plugin) in &self.plugins {
            if plugin.plugin_type.is_empty() {
                return Err(ConfigError::Plugin {
                    plugin: name.clone(),
                    reason: "missing required key 'type'".into(),
                });
            }
            plugin.retries.validate().map_err(|reason| ConfigError::Plugin {
                plugin: name.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Plugin instance by name
    pub fn plugin(&self, name: &str) -> Option<&PluginInstanceConfig> {
        self.plugins.get(name)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
