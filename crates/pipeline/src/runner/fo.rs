//! Filter/output runner: one implementation, two roles
//!
//! The most intricate runner: on top of the input runner's supervision it
//! adds pack retention across restart, and for filters a guarded `inject`
//! that refuses self-matching messages.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strom_matcher::Matcher;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::recreate_plugin;
use crate::globals::Globals;
use crate::pack::Pack;
use crate::plugin::{Filter, Output, PluginHelper, PluginKind, PluginWrapper};
use crate::retry::RetryHelper;
use crate::router::{ConsumerKind, RouterHandle};
use strom_config::PluginInstanceConfig;

/// Context a filter or output plugin drives from inside `run`
pub struct FoRunner {
    name: String,
    kind: ConsumerKind,
    globals: Arc<Globals>,
    router: RouterHandle,
    matcher: Arc<Matcher>,
    ticker_interval: Option<Duration>,
    /// Real inbound queue, fed by the router through this consumer's
    /// match runner
    in_rx: tokio::sync::Mutex<mpsc::Receiver<Pack>>,
    /// Pack parked by `retain_pack` for redelivery after a restart
    retained: Mutex<Option<Pack>>,
}

impl FoRunner {
    pub fn new(
        name: impl Into<String>,
        kind: ConsumerKind,
        globals: Arc<Globals>,
        router: RouterHandle,
        matcher: Arc<Matcher>,
        ticker_interval: Option<Duration>,
        in_rx: mpsc::Receiver<Pack>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            globals,
            router,
            matcher,
            ticker_interval,
            in_rx: tokio::sync::Mutex::new(in_rx),
            retained: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }

    /// This consumer's compiled predicate
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Next pack to process: a retained pack is always delivered first
    /// (clearing the retention slot), then reads resume from the real
    /// queue. `None` means the queue closed - time to return from `run`.
    pub async fn next_pack(&self) -> Option<Pack> {
        if let Some(pack) = self.retained.lock().take() {
            return Some(pack);
        }
        self.in_rx.lock().await.recv().await
    }

    /// Park one pack for redelivery to the next `run` invocation. Called by
    /// a plugin immediately before returning with the intent to restart.
    pub fn retain_pack(&self, pack: Pack) {
        *self.retained.lock() = Some(pack);
    }

    /// Whether a pack is currently parked
    pub fn has_retained(&self) -> bool {
        self.retained.lock().is_some()
    }

    /// Filter message injection, guarded against self-loops.
    ///
    /// A message the filter's own predicate would catch is rejected: the
    /// pack is recycled, an error is logged, and `false` comes back. The
    /// actual hand-off to the router happens from a detached task so a
    /// backed-up router cannot deadlock the filter against its own queue;
    /// consequently emission order relative to this filter's input
    /// consumption is not preserved.
    pub fn inject(&self, pack: Pack) -> bool {
        let matches_self = self.matcher.matches(&pack.message());
        if matches_self {
            error!(plugin = %self.name, "attempted to inject a message to itself");
            self.globals.pool().recycle(pack);
            return false;
        }
        let router = self.router.clone();
        tokio::spawn(async move {
            router.inject(pack).await;
        });
        true
    }

    /// Periodic timer when `ticker_interval` was configured. The first tick
    /// fires one full interval from now. Re-created per `run` invocation so
    /// no timer leaks across restarts.
    pub fn ticker(&self) -> Option<Interval> {
        self.ticker_interval
            .map(|d| tokio::time::interval_at(tokio::time::Instant::now() + d, d))
    }

    /// Recycle a pack this consumer has finished with
    pub fn recycle(&self, pack: Pack) {
        self.globals.pool().recycle(pack);
    }

    pub fn is_stopping(&self) -> bool {
        self.globals.is_stopping()
    }

    pub fn shutdown(&self) -> CancellationToken {
        self.globals.shutdown_token()
    }

    pub(crate) fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }
}

/// The plugin side of a filter/output supervisor
enum FoPlugin {
    Filter(Box<dyn Filter>),
    Output(Box<dyn Output>),
}

impl FoPlugin {
    async fn run(
        &mut self,
        runner: &FoRunner,
        helper: &PluginHelper,
    ) -> Result<(), crate::PluginError> {
        match self {
            FoPlugin::Filter(p) => p.run(runner, helper).await,
            FoPlugin::Output(p) => p.run(runner, helper).await,
        }
    }

    fn restartable(&self) -> bool {
        match self {
            FoPlugin::Filter(p) => p.restartable(),
            FoPlugin::Output(p) => p.restartable(),
        }
    }

    fn cleanup_for_restart(&mut self) {
        match self {
            FoPlugin::Filter(p) => p.cleanup_for_restart(),
            FoPlugin::Output(p) => p.cleanup_for_restart(),
        }
    }
}

/// Start the supervisor task for a filter plugin
pub fn spawn_filter(
    plugin: Box<dyn Filter>,
    wrapper: PluginWrapper,
    config: Arc<PluginInstanceConfig>,
    runner: Arc<FoRunner>,
    helper: PluginHelper,
) -> JoinHandle<()> {
    spawn_fo(FoPlugin::Filter(plugin), wrapper, config, runner, helper)
}

/// Start the supervisor task for an output plugin
pub fn spawn_output(
    plugin: Box<dyn Output>,
    wrapper: PluginWrapper,
    config: Arc<PluginInstanceConfig>,
    runner: Arc<FoRunner>,
    helper: PluginHelper,
) -> JoinHandle<()> {
    spawn_fo(FoPlugin::Output(plugin), wrapper, config, runner, helper)
}

fn spawn_fo(
    mut plugin: FoPlugin,
    wrapper: PluginWrapper,
    config: Arc<PluginInstanceConfig>,
    runner: Arc<FoRunner>,
    helper: PluginHelper,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let globals = Arc::clone(runner.globals());
        let mut retry = RetryHelper::new(config.retries.clone());
        let kind = runner.kind();

        loop {
            if globals.is_stopping() {
                break;
            }

            let clean = match plugin.run(&runner, &helper).await {
                Ok(()) => {
                    info!(plugin = %runner.name(), %kind, "stopped");
                    true
                }
                Err(e) => {
                    error!(plugin = %runner.name(), %kind, error = %e, "run failed");
                    false
                }
            };

            if globals.is_stopping() {
                break;
            }

            if !plugin.restartable() {
                if clean {
                    break;
                }
                error!(plugin = %runner.name(), %kind, "not restartable, shutting down");
                globals.fault_shutdown();
                break;
            }

            plugin.cleanup_for_restart();

            match recreate_plugin(&wrapper, &config, &mut retry, &globals).await {
                Some(PluginKind::Filter(fresh)) if kind == ConsumerKind::Filter => {
                    plugin = FoPlugin::Filter(fresh);
                }
                Some(PluginKind::Output(fresh)) if kind == ConsumerKind::Output => {
                    plugin = FoPlugin::Output(fresh);
                }
                Some(other) => {
                    error!(
                        plugin = %runner.name(),
                        role = other.role(),
                        "wrapper produced the wrong plugin role"
                    );
                    globals.fault_shutdown();
                    break;
                }
                None => break,
            }
            info!(plugin = %runner.name(), %kind, "exited, now restarting");
        }
    })
}
