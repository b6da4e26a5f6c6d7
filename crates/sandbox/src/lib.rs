//! Strom Sandbox - embedded script host driven as a decoder or filter
//!
//! Wraps a resource-limited [Rhai](https://rhai.rs) engine behind the
//! pipeline's decoder/filter contract. Scripts transform or synthesize
//! messages without a daemon rebuild, inside hard instruction, output,
//! and state-size limits.
//!
//! # Script contract
//!
//! A script must define `fn process_message()` returning an integer:
//! `0` success, `> 0` fatal (the script is dead), `< 0` non-fatal
//! processing failure. Filter scripts may also define
//! `fn timer_event(ns)`, invoked from the runner's ticker.
//!
//! Host functions available to scripts:
//!
//! | function | effect |
//! |---|---|
//! | `read_message(spec)` | read a header or `Fields[name]` of the input |
//! | `inject_message(payload, type, name)` | emit one outgoing message |
//! | `state_set(key, value)` / `state_get(key)` | durable script state |
//!
//! # Inject protocol
//!
//! Each `inject_message` call constructs one outgoing message. An empty
//! `payload_type` marks the payload as a binary-encoded message to be
//! decoded wholesale (a decode failure returns 1 to the script); anything
//! else becomes the payload string plus `payload_type`/`payload_name`
//! fields. Standard headers left unset are back-filled from the input
//! message captured before `process_message` began. The accumulated batch
//! becomes the decode result; a negative return discards it.
//!
//! Script state survives restarts when `preserve_data` is configured: the
//! state map is written as JSON on destroy and reloaded on init.

mod decoder;
mod error;
mod filter;
mod host;
mod usage;

pub use decoder::SandboxDecoder;
pub use error::SandboxError;
pub use filter::SandboxFilter;
pub use host::{RhaiSandbox, SandboxKind, SandboxSpec};
pub use usage::{Resource, Stat, UsageMeters};

/// Result type for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Default script state size cap (8MiB)
pub const DEFAULT_MEMORY_LIMIT: usize = 8 * 1024 * 1024;

/// Default Rhai operations per `process_message` call
pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 1_000_000;

/// Default bytes injectable per `process_message` call (63KiB)
pub const DEFAULT_OUTPUT_LIMIT: usize = 63 * 1024;

/// Default 1-in-K fraction of calls that record wall-clock duration
pub const DEFAULT_SAMPLE_DENOMINATOR: u32 = 50;

// Test modules - only compiled during testing
#[cfg(test)]
#[path = "host_test.rs"]
mod host_test;
#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
