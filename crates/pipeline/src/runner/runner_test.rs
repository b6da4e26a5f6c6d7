//! Supervision scenario tests
//!
//! Exercises the runner state machine end to end: bounded-retry restart,
//! retry exhaustion, pack retention across restart, and the filter
//! self-inject guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

use crate::plugin::{Output, Plugin, PluginHelper, PluginKind, PluginRegistry};
use crate::router::{ConsumerKind, Router};
use crate::runner::fo::{FoRunner, spawn_output};
use crate::{Globals, Matcher, PluginError, PluginInstanceConfig, RetryOptions};

const WAIT: Duration = Duration::from_secs(5);

/// Shared observation point between a test and its plugin instances
#[derive(Default)]
struct Probe {
    init_calls: AtomicU32,
    run_calls: AtomicU32,
    cleanup_calls: AtomicU32,
    /// Number of leading `init` calls that must fail
    init_failures: AtomicU32,
    /// Signals the test when `run` has started and parks until shutdown
    running: Notify,
}

impl Probe {
    fn new(init_failures: u32) -> Arc<Self> {
        let probe = Arc::new(Self::default());
        probe.init_failures.store(init_failures, Ordering::SeqCst);
        probe
    }
}

/// Output whose first run faults, and whose re-init fails a configured
/// number of times before succeeding.
struct FlakyOutput {
    probe: Arc<Probe>,
}

impl Plugin for FlakyOutput {
    fn init(&mut self, _config: &PluginInstanceConfig) -> Result<(), PluginError> {
        let n = self.probe.init_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.probe.init_failures.load(Ordering::SeqCst) {
            return Err(PluginError::msg("init refused"));
        }
        Ok(())
    }

    fn restartable(&self) -> bool {
        true
    }

    fn cleanup_for_restart(&mut self) {
        self.probe.cleanup_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Output for FlakyOutput {
    async fn run(&mut self, runner: &FoRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        let n = self.probe.run_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 {
            return Err(PluginError::msg("first run faults"));
        }
        // Recovered: tell the test and wait out the shutdown.
        self.probe.running.notify_one();
        runner.shutdown().cancelled().await;
        Ok(())
    }
}

/// Output that faults once without being restartable
struct BrittleOutput;

impl Plugin for BrittleOutput {
    fn init(&mut self, _config: &PluginInstanceConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl Output for BrittleOutput {
    async fn run(&mut self, _runner: &FoRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        Err(PluginError::msg("no second chances"))
    }
}

fn fast_retries(max_retries: i32) -> RetryOptions {
    RetryOptions {
        max_delay: Duration::from_micros(1),
        delay: Duration::from_micros(1),
        max_jitter: Duration::from_micros(1),
        max_retries,
    }
}

struct FoHarness {
    globals: Arc<Globals>,
    runner: Arc<FoRunner>,
    helper: PluginHelper,
    in_tx: mpsc::Sender<crate::Pack>,
}

fn fo_harness(matcher: &str) -> FoHarness {
    let globals = Globals::new(8, 4);
    let (_router, handle) = Router::new(Arc::clone(&globals));
    let (in_tx, in_rx) = mpsc::channel(4);
    let runner = Arc::new(FoRunner::new(
        "test_output",
        ConsumerKind::Output,
        Arc::clone(&globals),
        handle.clone(),
        Arc::new(Matcher::parse(matcher).expect("test matcher")),
        None,
        in_rx,
    ));
    let helper = PluginHelper::new(Arc::clone(&globals), handle, Arc::new(HashMap::new()));
    FoHarness {
        globals,
        runner,
        helper,
        in_tx,
    }
}

fn registry_with_flaky(probe: &Arc<Probe>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    let probe = Arc::clone(probe);
    registry.register("FlakyOutput", move || {
        PluginKind::Output(Box::new(FlakyOutput {
            probe: Arc::clone(&probe),
        }))
    });
    registry
}

#[tokio::test]
async fn test_supervised_restart_bounded_retries() {
    // Init fails twice then succeeds, with budget to spare: the supervisor
    // must converge back to Running without flipping the stopping flag.
    let probe = Probe::new(2);
    let registry = registry_with_flaky(&probe);
    let h = fo_harness("TRUE");

    let mut config = PluginInstanceConfig::of_type("FlakyOutput");
    config.retries = fast_retries(4);

    let plugin = Box::new(FlakyOutput {
        probe: Arc::clone(&probe),
    });
    let wrapper = registry.wrapper("FlakyOutput", "test_output").unwrap();
    let task = spawn_output(
        plugin,
        wrapper,
        Arc::new(config),
        Arc::clone(&h.runner),
        h.helper.clone(),
    );

    timeout(WAIT, probe.running.notified())
        .await
        .expect("plugin should recover into Running");

    assert_eq!(probe.init_calls.load(Ordering::SeqCst), 3);
    assert_eq!(probe.run_calls.load(Ordering::SeqCst), 2);
    assert_eq!(probe.cleanup_calls.load(Ordering::SeqCst), 1);
    assert!(!h.globals.is_stopping(), "recovery must not set stopping");

    h.globals.shut_down();
    timeout(WAIT, task).await.expect("supervisor exits").expect("no panic");
    assert!(!h.globals.is_faulted());
}

#[tokio::test]
async fn test_supervised_restart_exhaustion() {
    // Init never succeeds and the budget is tiny: two attempts, then the
    // supervisor gives up and broadcasts a fault shutdown.
    let probe = Probe::new(u32::MAX);
    let registry = registry_with_flaky(&probe);
    let h = fo_harness("TRUE");

    let mut config = PluginInstanceConfig::of_type("FlakyOutput");
    config.retries = fast_retries(1);

    let plugin = Box::new(FlakyOutput {
        probe: Arc::clone(&probe),
    });
    let wrapper = registry.wrapper("FlakyOutput", "test_output").unwrap();
    let task = spawn_output(
        plugin,
        wrapper,
        Arc::new(config),
        Arc::clone(&h.runner),
        h.helper.clone(),
    );

    timeout(WAIT, task).await.expect("supervisor exits").expect("no panic");

    assert_eq!(probe.init_calls.load(Ordering::SeqCst), 2);
    assert!(h.globals.is_stopping());
    assert!(h.globals.is_faulted());
}

#[tokio::test]
async fn test_non_restartable_fault_sets_stopping() {
    let h = fo_harness("TRUE");
    let mut registry = PluginRegistry::new();
    registry.register("BrittleOutput", || PluginKind::Output(Box::new(BrittleOutput)));

    let task = spawn_output(
        Box::new(BrittleOutput),
        registry.wrapper("BrittleOutput", "test_output").unwrap(),
        Arc::new(PluginInstanceConfig::of_type("BrittleOutput")),
        Arc::clone(&h.runner),
        h.helper.clone(),
    );

    timeout(WAIT, task).await.expect("supervisor exits").expect("no panic");
    assert!(h.globals.is_stopping());
    assert!(h.globals.is_faulted());
}

#[tokio::test]
async fn test_pack_retention_across_restart() {
    let h = fo_harness("TRUE");
    let pool = h.globals.pool().clone();

    // A pack the plugin was processing when it faulted...
    let retained = pool.acquire().await;
    retained.message_mut().set_type("retained");
    let retained_clone = Arc::clone(&retained);
    h.runner.retain_pack(retained);
    assert!(h.runner.has_retained());

    // ...and a pack waiting in the real queue behind it.
    let queued = pool.acquire().await;
    queued.message_mut().set_type("queued");
    h.in_tx.send(queued).await.expect("queue open");

    // The next run's very first read yields the retained pack.
    let first = timeout(WAIT, h.runner.next_pack())
        .await
        .expect("first read")
        .expect("pack");
    assert!(Arc::ptr_eq(&first, &retained_clone));
    assert!(!h.runner.has_retained(), "slot must clear after one read");

    // The second read resumes from the real queue.
    let second = timeout(WAIT, h.runner.next_pack())
        .await
        .expect("second read")
        .expect("pack");
    assert_eq!(second.message().msg_type(), "queued");

    pool.recycle(first);
    pool.recycle(second);
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn test_filter_self_inject_rejected() {
    // A filter whose matcher is TRUE would catch its own emission: inject
    // must refuse, recycle the pack, and return false.
    let h = fo_harness("TRUE");
    let pool = h.globals.pool().clone();
    let free_before = pool.available();

    let pack = pool.acquire().await;
    pack.message_mut().set_type("self-loop");

    assert!(!h.runner.inject(pack));
    assert_eq!(pool.available(), free_before);
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn test_filter_inject_non_matching_passes() {
    let h = fo_harness("Type == 'only-this'");
    let pool = h.globals.pool().clone();

    let pack = pool.acquire().await;
    pack.message_mut().set_type("something-else");

    assert!(h.runner.inject(pack));

    // The harness router was dropped, so the spawned hand-off ends in a
    // recycle at the handle; nothing leaks.
    timeout(WAIT, async {
        while pool.in_flight() != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("inject hand-off completes");
}
