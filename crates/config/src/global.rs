//! Process-wide settings

use serde::Deserialize;

use crate::{ConfigError, Result};

/// Global configuration that applies to the whole pipeline
///
/// All fields have sensible defaults - you only need to specify what you
/// want to change.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Number of message packs in the shared pool. The pool is the only
    /// backpressure mechanism: when every pack is in flight, inputs block.
    /// Default: 100
    pub pool_size: usize,

    /// Buffer capacity of each plugin's inbound channel.
    /// Default: 50
    pub plugin_chan_size: usize,

    /// Largest encoded message accepted on the wire (bytes).
    /// Default: 65536 (64KiB)
    pub max_msg_size: usize,

    /// How long shutdown waits for runners to drain before giving up.
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub drain_timeout: std::time::Duration,

    /// Base directory for sandbox scripts and preserved state.
    /// Default: "." (current directory)
    pub base_dir: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pool_size: 100,
            plugin_chan_size: 50,
            max_msg_size: 64 * 1024,
            drain_timeout: std::time::Duration::from_secs(5),
            base_dir: ".".into(),
        }
    }
}

impl GlobalConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ConfigError::Global("pool_size must be at least 1".into()));
        }
        if self.plugin_chan_size == 0 {
            return Err(ConfigError::Global(
                "plugin_chan_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
