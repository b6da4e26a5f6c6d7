//! Plugin contract, wrappers, and the type registry
//!
//! Four plugin roles share one capability surface (`Plugin`): init once,
//! optionally tolerate restart, optionally unblock on request. Roles are an
//! explicit tagged union (`PluginKind`) so the supervisors dispatch on the
//! tag instead of downcasting.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use strom_config::PluginInstanceConfig;

use crate::error::PluginError;
use crate::globals::Globals;
use crate::pack::Pack;
use crate::pool::PackPool;
use crate::router::RouterHandle;
use crate::runner::{DecoderContext, DecoderHandle, FoRunner, InputRunner};

/// Capability surface shared by every plugin role
pub trait Plugin: Send {
    /// Called exactly once per instance, before anything else. Failure at
    /// startup is fatal; failure during a supervised restart consumes a
    /// retry slot.
    fn init(&mut self, config: &PluginInstanceConfig) -> Result<(), PluginError>;

    /// Whether the plugin tolerates being re-initialized and re-run after
    /// a fault. Without this, a faulting `run` escalates to a process
    /// shutdown.
    fn restartable(&self) -> bool {
        false
    }

    /// Invoked between a fault and the re-creation of the instance
    fn cleanup_for_restart(&mut self) {}
}

/// Source plugin: pulls blank packs from the pool, populates them, and
/// injects them toward the router
#[async_trait]
pub trait Input: Plugin {
    /// Long-running body; returns only on clean shutdown or fatal error
    async fn run(
        &mut self,
        runner: &InputRunner,
        helper: &PluginHelper,
    ) -> Result<(), PluginError>;
}

/// Transform plugin: consumes matched packs, may inject new messages
#[async_trait]
pub trait Filter: Plugin {
    async fn run(&mut self, runner: &FoRunner, helper: &PluginHelper) -> Result<(), PluginError>;
}

/// Sink plugin: consumes matched packs
#[async_trait]
pub trait Output: Plugin {
    async fn run(&mut self, runner: &FoRunner, helper: &PluginHelper) -> Result<(), PluginError>;
}

/// Outcome of one decode call
///
/// The input pack travels through the return value, so every exit path
/// either forwards it or hands it back for recycling - never both.
pub enum Decoded {
    /// Forward these packs to the router. A decoder emitting more than the
    /// original pack acquires the extras through its [`DecoderContext`].
    Emit(Vec<Pack>),
    /// The decoder chose to drop the pack; recycled silently
    Drop(Pack),
    /// Decoding failed; logged, then recycled
    Fail(Pack, PluginError),
}

/// Adapter plugin: turns raw or foreign records into zero-or-more messages
///
/// Decoders are not supervised for restart: they are stateless adapters,
/// and a fatal condition inside one propagates a process shutdown.
pub trait Decoder: Plugin {
    /// Synchronously decode one pack into zero or more packs
    fn decode(&mut self, pack: Pack) -> Decoded;

    /// Invoked once when the runner starts, for decoders that need pool or
    /// router access (e.g. multi-message emission)
    fn attach(&mut self, ctx: DecoderContext) {
        let _ = ctx;
    }

    /// Invoked once as the runner exits
    fn shutdown(&mut self) {}
}

/// A plugin instance tagged with its role
pub enum PluginKind {
    Input(Box<dyn Input>),
    Decoder(Box<dyn Decoder>),
    Filter(Box<dyn Filter>),
    Output(Box<dyn Output>),
}

impl PluginKind {
    /// Role name for logs and error messages
    pub fn role(&self) -> &'static str {
        match self {
            PluginKind::Input(_) => "input",
            PluginKind::Decoder(_) => "decoder",
            PluginKind::Filter(_) => "filter",
            PluginKind::Output(_) => "output",
        }
    }

    /// Role-independent access to the shared capability surface
    pub fn plugin_mut(&mut self) -> &mut dyn Plugin {
        match self {
            PluginKind::Input(p) => p.as_mut(),
            PluginKind::Decoder(p) => p.as_mut(),
            PluginKind::Filter(p) => p.as_mut(),
            PluginKind::Output(p) => p.as_mut(),
        }
    }
}

/// Factory closure producing fresh instances of one plugin type
pub type PluginConstructor = dyn Fn() -> PluginKind + Send + Sync;

/// Recipe for re-creating a plugin instance after a crash
///
/// The wrapper is the single source of truth the supervisor consults when
/// a restartable plugin faults: fresh instance, fresh `init`.
#[derive(Clone)]
pub struct PluginWrapper {
    name: String,
    constructor: Arc<PluginConstructor>,
}

impl PluginWrapper {
    pub fn new(name: impl Into<String>, constructor: Arc<PluginConstructor>) -> Self {
        Self {
            name: name.into(),
            constructor,
        }
    }

    /// Instance name this wrapper re-creates
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Produce a fresh, uninitialized instance
    pub fn create(&self) -> PluginKind {
        (self.constructor)()
    }
}

/// Registry mapping plugin type names to constructors
///
/// Populated once at startup with the built-in plugin set (plus whatever
/// the embedding binary adds); immutable afterwards.
#[derive(Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, Arc<PluginConstructor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin type
    ///
    /// # Panics
    ///
    /// Panics when the type name is already taken; duplicate registration
    /// is a programming error in the embedding binary.
    pub fn register<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn() -> PluginKind + Send + Sync + 'static,
    {
        if self
            .constructors
            .insert(type_name.to_string(), Arc::new(constructor))
            .is_some()
        {
            panic!("plugin type '{type_name}' registered twice");
        }
    }

    /// Create a fresh instance of a registered type
    pub fn create(&self, type_name: &str) -> Option<PluginKind> {
        self.constructors.get(type_name).map(|c| c())
    }

    /// Wrapper for re-creating instances of `type_name` under `instance`
    pub fn wrapper(&self, type_name: &str, instance: &str) -> Option<PluginWrapper> {
        self.constructors
            .get(type_name)
            .map(|c| PluginWrapper::new(instance, Arc::clone(c)))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted for stable error messages
    pub fn available_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}

/// Shared context handed to every plugin's `run`
///
/// Borrowed, non-owning view of the pipeline: plugins reach the pool, the
/// router, and decoder queues through it, never the other way around.
#[derive(Clone)]
pub struct PluginHelper {
    globals: Arc<Globals>,
    router: RouterHandle,
    decoders: Arc<HashMap<String, DecoderHandle>>,
    hostname: String,
    pid: i32,
}

impl PluginHelper {
    pub fn new(
        globals: Arc<Globals>,
        router: RouterHandle,
        decoders: Arc<HashMap<String, DecoderHandle>>,
    ) -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        Self {
            globals,
            router,
            decoders,
            hostname,
            pid: std::process::id() as i32,
        }
    }

    pub fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }

    pub fn pool(&self) -> &PackPool {
        self.globals.pool()
    }

    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Inbound queue of a named decoder instance
    pub fn decoder(&self, name: &str) -> Option<DecoderHandle> {
        self.decoders.get(name).cloned()
    }

    /// Hostname stamped onto locally generated messages
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Pid stamped onto locally generated messages
    pub fn pid(&self) -> i32 {
        self.pid
    }
}
