//! Decoder runner: drives an adapter plugin over its inbound queue
//!
//! Simpler than the supervised runners: one task drains the queue, feeds
//! each pack through `decode`, and disposes of the result. Decoders are
//! not restarted; a fatal condition inside one escalates to shutdown.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::globals::Globals;
use crate::pack::Pack;
use crate::plugin::{Decoded, Decoder};
use crate::pool::PackPool;
use crate::router::RouterHandle;

/// Producer side of a decoder runner's inbound queue
///
/// Inputs hold one of these per configured decoder and `send` populated
/// packs into it.
#[derive(Clone)]
pub struct DecoderHandle {
    name: Arc<str>,
    tx: mpsc::Sender<Pack>,
    pool: PackPool,
}

impl DecoderHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a pack for decoding; recycles it when the runner is gone
    pub async fn send(&self, pack: Pack) {
        if let Err(e) = self.tx.send(pack).await {
            debug!(decoder = %self.name, "decoder gone; recycling pack");
            self.pool.recycle(e.0);
        }
    }
}

/// Runner access handed to a decoder plugin through `attach`
///
/// Lets multi-message decoders draw extra packs and reach the router.
/// Deliberately excludes the inbound queue so a decoder cannot keep its
/// own runner alive.
#[derive(Clone)]
pub struct DecoderContext {
    name: Arc<str>,
    globals: Arc<Globals>,
    pool: PackPool,
    router: RouterHandle,
}

impl DecoderContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared pipeline state, for decoders that must escalate a fatal
    /// condition into a process shutdown
    pub fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }

    /// Acquire an additional blank pack for multi-message emission.
    ///
    /// Fast path is non-blocking; when the pool is dry this parks the
    /// calling worker thread until a pack frees up, so it needs the
    /// multi-threaded runtime. Returns `None` when called outside one.
    pub fn new_pack(&self) -> Option<Pack> {
        if let Some(pack) = self.pool.try_acquire() {
            return Some(pack);
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let pool = self.pool.clone();
        tokio::task::block_in_place(move || handle.block_on(async { Some(pool.acquire().await) }))
    }

    /// The shared pack pool
    pub fn pool(&self) -> &PackPool {
        &self.pool
    }

    /// The router, for decoders that emit out-of-band
    pub fn router(&self) -> &RouterHandle {
        &self.router
    }
}

/// The runner task state for one decoder instance
pub struct DecoderRunner {
    name: String,
    globals: Arc<Globals>,
    router: RouterHandle,
    rx: mpsc::Receiver<Pack>,
}

impl DecoderRunner {
    /// Create the runner and the handle producers use to reach it
    pub fn new(
        name: impl Into<String>,
        globals: Arc<Globals>,
        router: RouterHandle,
    ) -> (Self, DecoderHandle) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(globals.plugin_chan_size());
        let handle = DecoderHandle {
            name: Arc::from(name.as_str()),
            tx,
            pool: globals.pool().clone(),
        };
        (
            Self {
                name,
                globals,
                router,
                rx,
            },
            handle,
        )
    }

    /// Start the runner task
    pub fn spawn(self, mut plugin: Box<dyn Decoder>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let DecoderRunner {
                name,
                globals,
                router,
                mut rx,
            } = self;

            plugin.attach(DecoderContext {
                name: Arc::from(name.as_str()),
                globals: Arc::clone(&globals),
                pool: globals.pool().clone(),
                router: router.clone(),
            });

            while let Some(pack) = rx.recv().await {
                match plugin.decode(pack) {
                    Decoded::Emit(packs) => {
                        for p in packs {
                            router.inject(p).await;
                        }
                    }
                    Decoded::Drop(pack) => {
                        globals.pool().recycle(pack);
                    }
                    Decoded::Fail(pack, err) => {
                        error!(decoder = %name, error = %err, "decode failed");
                        globals.pool().recycle(pack);
                    }
                }
                if globals.is_stopping() {
                    // Drain fast during shutdown: recycle without decoding.
                    while let Ok(pack) = rx.try_recv() {
                        globals.pool().recycle(pack);
                    }
                    break;
                }
            }

            plugin.shutdown();
            info!(decoder = %name, "stopped");
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
