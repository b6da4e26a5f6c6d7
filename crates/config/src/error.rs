//! Configuration error types

use thiserror::Error;

/// Configuration errors
///
/// All configuration problems are fatal at startup; the daemon reports them
/// with the offending plugin name and exits non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML syntax or shape
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    /// A plugin instance table is invalid
    #[error("plugin '{plugin}': {reason}")]
    Plugin { plugin: String, reason: String },

    /// A global setting is invalid
    #[error("invalid global setting: {0}")]
    Global(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
