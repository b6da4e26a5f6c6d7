//! Input runner: supervises a source plugin

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{DecoderHandle, recreate_plugin};
use crate::globals::Globals;
use crate::pack::Pack;
use crate::plugin::{Input, PluginHelper, PluginKind, PluginWrapper};
use crate::retry::RetryHelper;
use crate::router::RouterHandle;
use strom_config::PluginInstanceConfig;

/// Context an input plugin drives from inside `run`
///
/// Blank packs come from the shared pool (`new_pack`), populated packs go
/// to the configured decoder or straight to the router (`inject`).
/// `Clone` is cheap; inputs that serve many connections hand each
/// connection task its own copy.
#[derive(Clone)]
pub struct InputRunner {
    name: String,
    globals: Arc<Globals>,
    router: RouterHandle,
    decoder: Option<DecoderHandle>,
    ticker_interval: Option<Duration>,
}

impl InputRunner {
    pub fn new(
        name: impl Into<String>,
        globals: Arc<Globals>,
        router: RouterHandle,
        decoder: Option<DecoderHandle>,
        ticker_interval: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            globals,
            router,
            decoder,
            ticker_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a blank pack, blocking while the pool is empty. `None` means
    /// the pipeline is shutting down and `run` should return.
    pub async fn new_pack(&self) -> Option<Pack> {
        let token = self.globals.shutdown_token();
        tokio::select! {
            pack = self.globals.pool().acquire() => Some(pack),
            _ = token.cancelled() => None,
        }
    }

    /// Whether a decoder is wired between this input and the router
    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Hand a populated pack downstream: to the configured decoder when one
    /// is wired, otherwise into the router's inbound queue.
    pub async fn inject(&self, pack: Pack) {
        match &self.decoder {
            Some(decoder) => decoder.send(pack).await,
            None => {
                self.router.inject(pack).await;
            }
        }
    }

    /// Periodic timer when `ticker_interval` was configured. The first tick
    /// fires one full interval from now. Re-created per `run` invocation so
    /// no timer leaks across restarts.
    pub fn ticker(&self) -> Option<Interval> {
        self.ticker_interval
            .map(|d| tokio::time::interval_at(tokio::time::Instant::now() + d, d))
    }

    /// Level-triggered stop flag; poll at loop tops
    pub fn is_stopping(&self) -> bool {
        self.globals.is_stopping()
    }

    /// Token to select on alongside blocking I/O
    pub fn shutdown(&self) -> CancellationToken {
        self.globals.shutdown_token()
    }

    /// Recycle a pack this input no longer intends to inject
    pub fn recycle(&self, pack: Pack) {
        self.globals.pool().recycle(pack);
    }

    pub(crate) fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }
}

/// Start the supervisor task for one input plugin
pub fn spawn_input(
    mut plugin: Box<dyn Input>,
    wrapper: PluginWrapper,
    config: Arc<PluginInstanceConfig>,
    runner: Arc<InputRunner>,
    helper: PluginHelper,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let globals = Arc::clone(runner.globals());
        let mut retry = RetryHelper::new(config.retries.clone());

        loop {
            if globals.is_stopping() {
                break;
            }

            let clean = match plugin.run(&runner, &helper).await {
                Ok(()) => {
                    info!(input = %runner.name(), "stopped");
                    true
                }
                Err(e) => {
                    error!(input = %runner.name(), error = %e, "run failed");
                    false
                }
            };

            if globals.is_stopping() {
                break;
            }

            if !plugin.restartable() {
                if clean {
                    // Clean exit of a non-restartable input is terminal for
                    // this runner only.
                    break;
                }
                error!(input = %runner.name(), "not restartable, shutting down");
                globals.fault_shutdown();
                break;
            }

            plugin.cleanup_for_restart();

            match recreate_plugin(&wrapper, &config, &mut retry, &globals).await {
                Some(PluginKind::Input(fresh)) => plugin = fresh,
                Some(other) => {
                    error!(
                        input = %runner.name(),
                        role = other.role(),
                        "wrapper produced the wrong plugin role"
                    );
                    globals.fault_shutdown();
                    break;
                }
                None => break,
            }
            info!(input = %runner.name(), "exited, now restarting");
        }
    })
}
