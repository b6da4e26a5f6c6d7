//! Pipeline error types

use thiserror::Error;

/// Errors surfaced by the pipeline core
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Config named a plugin type nobody registered
    #[error("plugin '{plugin}': unknown type '{plugin_type}'")]
    UnknownPluginType { plugin: String, plugin_type: String },

    /// A plugin failed to initialize at startup
    #[error("plugin '{plugin}' failed to initialize: {source}")]
    InitFailed {
        plugin: String,
        #[source]
        source: PluginError,
    },

    /// Filters and outputs must declare a message_matcher
    #[error("plugin '{plugin}': missing required 'message_matcher'")]
    MissingMatcher { plugin: String },

    /// The message_matcher predicate failed to compile
    #[error("plugin '{plugin}': bad message_matcher: {source}")]
    BadMatcher {
        plugin: String,
        #[source]
        source: strom_matcher::MatchError,
    },

    /// An input referenced a decoder instance that does not exist
    #[error("plugin '{plugin}': unknown decoder '{decoder}'")]
    UnknownDecoder { plugin: String, decoder: String },

    /// A plugin type was declared with a role its position cannot use
    #[error("plugin '{plugin}': type '{plugin_type}' is a {role}, which cannot be used here")]
    RoleMismatch {
        plugin: String,
        plugin_type: String,
        role: &'static str,
    },

    /// The restart supervisor ran out of attempts
    #[error("retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// The pipeline shut down because a component faulted
    #[error("pipeline terminated after a fault")]
    Faulted,
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type plugins return from `init`, `run`, and `decode`
///
/// Open-ended by design: plugin bodies do I/O the core knows nothing about.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Msg(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] strom_protocol::ProtocolError),
}

impl PluginError {
    /// Convenience constructor for ad-hoc error strings
    pub fn msg(m: impl Into<String>) -> Self {
        Self::Msg(m.into())
    }
}
