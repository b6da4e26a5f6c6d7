//! Fixed-size recyclable pack pool
//!
//! The pool pre-allocates every pack at startup and hands them out zeroed.
//! `acquire` blocks while all packs are in flight - this is the pipeline's
//! sole backpressure mechanism, propagating pressure from slow consumers
//! all the way to the inputs' upstream sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;
use tokio::sync::Notify;
use tracing::error;

use crate::pack::{Pack, PipelinePack};

/// Shared handle to the pack pool; cheap to clone
#[derive(Clone)]
pub struct PackPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Lock-free free list
    free: ArrayQueue<Pack>,
    /// Wakes one blocked acquirer per recycle
    notify: Notify,
    capacity: usize,
    in_flight: AtomicUsize,
}

impl PackPool {
    /// Pre-allocate a pool of `capacity` packs
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Filling an empty queue cannot fail.
            let _ = free.push(Arc::new(PipelinePack::new()));
        }
        Self {
            inner: Arc::new(PoolInner {
                free,
                notify: Notify::new(),
                capacity,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a zeroed pack, waiting until one is free
    pub async fn acquire(&self) -> Pack {
        loop {
            // Register interest before checking, or a recycle between the
            // check and the await would be missed.
            let notified = self.inner.notify.notified();
            if let Some(pack) = self.try_acquire() {
                return pack;
            }
            notified.await;
        }
    }

    /// Take a zeroed pack if one is immediately free
    pub fn try_acquire(&self) -> Option<Pack> {
        let pack = self.inner.free.pop()?;
        pack.set_ref_count(1);
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(pack)
    }

    /// Release one reference; the final reference zeroes the pack and
    /// returns it to the free list
    pub fn recycle(&self, pack: Pack) {
        let prev = pack.dec_ref_count();
        match prev {
            0 => {
                error!("pack recycled twice; dropping the extra recycle");
                debug_assert!(prev > 0, "pack double recycle");
            }
            1 => {
                pack.reset();
                self.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
                if self.inner.free.push(pack).is_err() {
                    error!("pack pool free list overflow; pack dropped");
                    debug_assert!(false, "pool overflow implies a foreign pack");
                }
                self.inner.notify.notify_one();
            }
            _ => {}
        }
    }

    /// Packs currently on the free list
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    /// Packs currently held by the pipeline
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Total pool size
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl std::fmt::Debug for PackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
