//! Strom Pipeline - the runtime core of the daemon
//!
//! # Architecture
//!
//! ```text
//! [Inputs]                       [Router]                  [Consumers]
//!   tcp ──┐  acquire                                    ┌──→ filter ──┐
//!   ...  ─┼──[PackPool]──→ (decoder?) ──→ match engine ─┼──→ output   │ inject
//!         │     ↑                             O(n)      └──→ output   │
//!         │     └───────────── recycle ←───────────────────────┘ ←────┘
//! ```
//!
//! # Key Design
//!
//! - **Pack pool backpressure**: a fixed pool of message envelopes is the
//!   only admission control; when every pack is in flight, inputs block on
//!   acquire and pressure propagates upstream.
//! - **Reference-counted fan-out**: the router establishes a pack's
//!   reference count before the first delivery; the final consumer's
//!   recycle returns the pack to the pool.
//! - **Supervised runners**: every plugin runs under a per-plugin
//!   supervisor that restarts restartable plugins with bounded exponential
//!   backoff and otherwise broadcasts shutdown.
//! - **Compiled matchers**: each filter/output owns a predicate compiled at
//!   config load; the router evaluates them serially in registration order.
//!
//! # Pack recycle discipline
//!
//! Any code that takes a pack from an inbound channel must, on every exit
//! path, either forward it to exactly one downstream channel or recycle it
//! exactly once. The `Decoded` enum threads packs through decoder returns
//! so the compiler enforces most of this.

mod engine;
mod error;
mod globals;
mod pack;
mod plugin;
mod pool;
mod retry;
mod router;
mod runner;

pub use engine::{Pipeline, PipelineBuilder};
pub use error::{PipelineError, PluginError, Result};
pub use globals::Globals;
pub use pack::{Pack, PipelinePack};
pub use plugin::{
    Decoded, Decoder, Filter, Input, Output, Plugin, PluginConstructor, PluginHelper, PluginKind,
    PluginRegistry, PluginWrapper,
};
pub use pool::PackPool;
pub use retry::RetryHelper;
pub use router::{ConsumerKind, MatchRunner, Router, RouterHandle, RouterMetrics, RouterSnapshot};
pub use runner::{DecoderContext, DecoderHandle, DecoderRunner, FoRunner, InputRunner};

// Re-export commonly paired types
pub use strom_config::{PluginInstanceConfig, RetryOptions};
pub use strom_matcher::Matcher;
pub use strom_protocol::Message;

/// Default capacity of each plugin's inbound channel
pub const DEFAULT_PLUGIN_CHAN_SIZE: usize = 50;

/// Default number of packs in the shared pool
pub const DEFAULT_POOL_SIZE: usize = 100;

// Test modules - only compiled during testing
#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
#[cfg(test)]
#[path = "retry_test.rs"]
mod retry_test;
