//! Process-wide pipeline state

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pool::PackPool;

/// Shared state every runner holds a reference to
///
/// Lifecycle is bounded by process start and termination. Once the stopping
/// flag is set all runners observe it at their loop tops; blocked runners
/// wake through the cancellation token.
pub struct Globals {
    pool: PackPool,
    stopping: AtomicBool,
    faulted: AtomicBool,
    shutdown: CancellationToken,
    plugin_chan_size: usize,
}

impl Globals {
    pub fn new(pool_size: usize, plugin_chan_size: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: PackPool::new(pool_size),
            stopping: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            plugin_chan_size: plugin_chan_size.max(1),
        })
    }

    /// The shared pack pool
    pub fn pool(&self) -> &PackPool {
        &self.pool
    }

    /// Level-triggered stop flag; runners poll this at loop tops
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Broadcast shutdown; idempotent
    pub fn shut_down(&self) {
        if !self.stopping.swap(true, Ordering::AcqRel) {
            info!("shutdown requested");
            self.shutdown.cancel();
        }
    }

    /// Broadcast shutdown caused by a component fault; the process will
    /// exit non-zero
    pub fn fault_shutdown(&self) {
        self.faulted.store(true, Ordering::Release);
        self.shut_down();
    }

    /// Whether shutdown was triggered by a fault
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Token blocked runners select on alongside their channels
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Configured inbound channel capacity for plugins
    pub fn plugin_chan_size(&self) -> usize {
        self.plugin_chan_size
    }
}

impl std::fmt::Debug for Globals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Globals")
            .field("stopping", &self.is_stopping())
            .field("faulted", &self.is_faulted())
            .field("pool", &self.pool)
            .finish()
    }
}
