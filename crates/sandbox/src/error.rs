//! Sandbox error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or tearing down a script host
///
/// Script-time failures do not appear here; they flow through the
/// `process_message` return-code protocol instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Script file could not be read
    #[error("failed to read script '{path}': {source}")]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Script failed to compile
    #[error("script '{path}' failed to compile: {reason}")]
    Compile { path: PathBuf, reason: String },

    /// Top-level script statements failed to evaluate
    #[error("script '{path}' failed to initialize: {reason}")]
    InitEval { path: PathBuf, reason: String },

    /// Script does not define the required entry point
    #[error("script '{path}' does not define fn process_message()")]
    MissingEntryPoint { path: PathBuf },

    /// Preserved state file exists but cannot be loaded
    #[error("failed to load preserved state '{path}': {reason}")]
    PreservedLoad { path: PathBuf, reason: String },

    /// Preserved state could not be written at destroy
    #[error("failed to write preserved state '{path}': {source}")]
    PreservedWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
