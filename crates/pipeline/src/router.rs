//! Central fan-out and the match runners
//!
//! The router is a single task draining one inbound queue. Serialization
//! buys two guarantees: predicate evaluation order is deterministic
//! (registration order), and a pack's reference count is established
//! atomically from any consumer's point of view - the count is stored
//! before the first delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strom_matcher::Matcher;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::globals::Globals;
use crate::pack::Pack;
use crate::pool::PackPool;

/// Which consumer class a match runner feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    Filter,
    Output,
}

impl std::fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerKind::Filter => write!(f, "filter"),
            ConsumerKind::Output => write!(f, "output"),
        }
    }
}

/// Per-consumer predicate and inbound queue pair
///
/// Created at config time, registered with the router before the engine
/// starts, dropped when the router stops (which closes the consumer's
/// queue and signals its shutdown).
pub struct MatchRunner {
    name: String,
    kind: ConsumerKind,
    matcher: Arc<Matcher>,
    tx: mpsc::Sender<Pack>,
}

impl MatchRunner {
    pub fn new(
        name: impl Into<String>,
        kind: ConsumerKind,
        matcher: Arc<Matcher>,
        tx: mpsc::Sender<Pack>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher,
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Hand a pack to the consumer, waiting for queue capacity.
    ///
    /// Waiting here can delay the router but cannot deadlock it: total
    /// in-flight work is bounded by the pack pool. Returns the pack when
    /// the consumer is gone so the caller can recycle it.
    async fn deliver(&self, pack: Pack) -> Result<(), Pack> {
        self.tx.send(pack).await.map_err(|e| e.0)
    }
}

/// Router counters
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Packs pulled off the inbound queue
    pub processed: AtomicU64,
    /// Deliveries to matched consumers
    pub delivered: AtomicU64,
    /// Packs recycled because no predicate matched
    pub unmatched: AtomicU64,
}

/// Point-in-time snapshot of router counters
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterSnapshot {
    pub processed: u64,
    pub delivered: u64,
    pub unmatched: u64,
}

impl RouterMetrics {
    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
        }
    }
}

/// Sending side of the router's inbound queue
///
/// Held by inputs, decoders, and filters. When the router is already gone
/// (late shutdown), injection recycles the pack instead of leaking it.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<Pack>,
    pool: PackPool,
}

impl RouterHandle {
    /// Queue a pack for fan-out; true when the router accepted it
    pub async fn inject(&self, pack: Pack) -> bool {
        match self.tx.send(pack).await {
            Ok(()) => true,
            Err(e) => {
                debug!("router gone; recycling injected pack");
                self.pool.recycle(e.0);
                false
            }
        }
    }
}

/// Central fan-out task
pub struct Router {
    rx: mpsc::Receiver<Pack>,
    consumers: Vec<MatchRunner>,
    pool: PackPool,
    globals: Arc<Globals>,
    metrics: Arc<RouterMetrics>,
}

impl Router {
    /// Create the router and the handle its producers share
    pub fn new(globals: Arc<Globals>) -> (Self, RouterHandle) {
        let (tx, rx) = mpsc::channel(globals.plugin_chan_size());
        let pool = globals.pool().clone();
        let handle = RouterHandle {
            tx,
            pool: pool.clone(),
        };
        (
            Self {
                rx,
                consumers: Vec::new(),
                pool,
                globals,
                metrics: Arc::new(RouterMetrics::default()),
            },
            handle,
        )
    }

    /// Register a consumer; evaluation follows registration order
    pub fn register(&mut self, runner: MatchRunner) {
        debug!(
            consumer = %runner.name(),
            kind = %runner.kind(),
            matcher = %runner.matcher(),
            "registered match runner"
        );
        self.consumers.push(runner);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Shared handle to the router's counters
    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Drain the inbound queue until shutdown
    ///
    /// Consumes the router; dropping the registered match runners on exit
    /// closes every consumer's inbound queue.
    pub async fn run(mut self) {
        info!(consumers = self.consumers.len(), "router starting");
        let token = self.globals.shutdown_token();

        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(pack) => self.route(pack).await,
                    None => break,
                },
                _ = token.cancelled() => {
                    // Flush whatever was queued before the broadcast, then
                    // stop; later injections recycle at the handle.
                    while let Ok(pack) = self.rx.try_recv() {
                        self.route(pack).await;
                    }
                    break;
                }
            }
        }

        let s = self.metrics.snapshot();
        info!(
            processed = s.processed,
            delivered = s.delivered,
            unmatched = s.unmatched,
            "router stopped"
        );
    }

    /// Fan one pack out to every matching consumer
    async fn route(&self, pack: Pack) {
        self.metrics.processed.fetch_add(1, Ordering::Relaxed);

        // Evaluate every predicate against a consistent snapshot; the read
        // guard is dropped before any delivery.
        let matched: Vec<usize> = {
            let msg = pack.message();
            self.consumers
                .iter()
                .enumerate()
                .filter(|(_, c)| c.matcher.matches(&msg))
                .map(|(i, _)| i)
                .collect()
        };

        if matched.is_empty() {
            trace!("no matching consumer; recycling");
            self.metrics.unmatched.fetch_add(1, Ordering::Relaxed);
            self.pool.recycle(pack);
            return;
        }

        // The full fan-out count must be on the pack before the first
        // consumer can see it.
        pack.set_ref_count(matched.len() as u32);

        for i in matched {
            let consumer = &self.consumers[i];
            match consumer.deliver(Arc::clone(&pack)).await {
                Ok(()) => {
                    self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(returned) => {
                    warn!(
                        consumer = %consumer.name(),
                        "consumer queue closed; recycling its share"
                    );
                    self.pool.recycle(returned);
                }
            }
        }
    }
}
