//! Resource meters exposed by the script host

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Metered resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Approximate bytes of durable script state plus pending output
    Memory,
    /// Rhai operations consumed by the last call
    Instructions,
    /// Bytes injected by the last call
    Output,
}

/// Which statistic of a resource to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Current,
    Maximum,
}

/// Meters for one script host instance
///
/// Monotonic counters are atomics; the duration sample aggregate sits
/// under its own lock because the two fields must move together.
#[derive(Debug, Default)]
pub struct UsageMeters {
    mem_current: AtomicU64,
    mem_max: AtomicU64,
    inst_current: AtomicU64,
    inst_max: AtomicU64,
    out_current: AtomicU64,
    out_max: AtomicU64,

    /// Messages pushed through `process_message`
    pub process_count: AtomicU64,
    /// Calls that returned a negative (non-fatal failure) code
    pub process_failures: AtomicU64,

    duration: Mutex<DurationSample>,
}

#[derive(Debug, Default, Clone, Copy)]
struct DurationSample {
    samples: u64,
    total_ns: u64,
}

impl UsageMeters {
    /// Read one meter
    pub fn usage(&self, resource: Resource, stat: Stat) -> u64 {
        let cell = match (resource, stat) {
            (Resource::Memory, Stat::Current) => &self.mem_current,
            (Resource::Memory, Stat::Maximum) => &self.mem_max,
            (Resource::Instructions, Stat::Current) => &self.inst_current,
            (Resource::Instructions, Stat::Maximum) => &self.inst_max,
            (Resource::Output, Stat::Current) => &self.out_current,
            (Resource::Output, Stat::Maximum) => &self.out_max,
        };
        cell.load(Ordering::Relaxed)
    }

    pub(crate) fn set_current(&self, resource: Resource, value: u64) {
        let (cur, max) = match resource {
            Resource::Memory => (&self.mem_current, &self.mem_max),
            Resource::Instructions => (&self.inst_current, &self.inst_max),
            Resource::Output => (&self.out_current, &self.out_max),
        };
        cur.store(value, Ordering::Relaxed);
        max.fetch_max(value, Ordering::Relaxed);
    }

    pub(crate) fn add_current(&self, resource: Resource, delta: u64) -> u64 {
        let (cur, max) = match resource {
            Resource::Memory => (&self.mem_current, &self.mem_max),
            Resource::Instructions => (&self.inst_current, &self.inst_max),
            Resource::Output => (&self.out_current, &self.out_max),
        };
        let new = cur.fetch_add(delta, Ordering::Relaxed) + delta;
        max.fetch_max(new, Ordering::Relaxed);
        new
    }

    /// Record one sampled wall-clock duration
    pub(crate) fn record_duration(&self, ns: u64) {
        let mut d = self.duration.lock();
        d.samples += 1;
        d.total_ns += ns;
    }

    /// Mean sampled `process_message` duration in nanoseconds
    pub fn avg_duration_ns(&self) -> u64 {
        let d = self.duration.lock();
        if d.samples == 0 { 0 } else { d.total_ns / d.samples }
    }

    /// Number of duration samples taken
    pub fn duration_samples(&self) -> u64 {
        self.duration.lock().samples
    }
}
