//! Per-instance plugin configuration
//!
//! Every non-reserved top-level table declares one plugin instance. Keys the
//! core understands are lifted into struct fields; everything else lands in
//! `options` for the plugin's own `init` to interpret.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::RetryOptions;

/// Configuration for a single plugin instance
#[derive(Debug, Clone, Deserialize)]
pub struct PluginInstanceConfig {
    /// Registered plugin type, e.g. "TcpInput"
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Match predicate; required for filters and outputs
    pub message_matcher: Option<String>,

    /// Seconds between ticks on the runner's timer, when set
    pub ticker_interval: Option<u64>,

    /// Name of the decoder instance an input hands its records to
    pub decoder: Option<String>,

    /// Supervised-restart backoff settings
    #[serde(default)]
    pub retries: RetryOptions,

    /// Plugin-specific options, passed through to `init`
    #[serde(flatten)]
    pub options: HashMap<String, toml::Value>,
}

impl PluginInstanceConfig {
    /// Bare config for tests and programmatic construction
    pub fn of_type(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            message_matcher: None,
            ticker_interval: None,
            decoder: None,
            retries: RetryOptions::default(),
            options: HashMap::new(),
        }
    }

    /// Set an option value (builder style, mostly for tests)
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_matcher(mut self, matcher: impl Into<String>) -> Self {
        self.message_matcher = Some(matcher.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(|v| v.as_integer())
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.options.get(key).and_then(|v| v.as_float())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        self.options.get(key).and_then(|v| {
            v.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
        })
    }
}
