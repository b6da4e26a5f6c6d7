//! Sandbox-backed filter plugin

use async_trait::async_trait;
use strom_pipeline::{Filter, FoRunner, Plugin, PluginError, PluginHelper, PluginInstanceConfig};
use strom_protocol::now_nanos;
use tokio::time::Interval;
use tracing::error;

use crate::decoder::spec_from_config;
use crate::host::{RhaiSandbox, SandboxKind};

/// Filter that delegates matched packs to an embedded script
///
/// Injected messages are stamped with the filter's name as logger and
/// emitted through the runner's guarded `inject`, so a script cannot loop
/// a message back into its own matcher. `timer_event` fires on the
/// runner's ticker.
///
/// Script faults normally shut the process down; setting the
/// `restartable` option instead recreates the script under the plugin's
/// retry policy, carrying durable state across when `preserve_data` is
/// also set.
pub struct SandboxFilter {
    sandbox: Option<RhaiSandbox>,
    restartable: bool,
}

impl SandboxFilter {
    pub fn new() -> Self {
        Self {
            sandbox: None,
            restartable: false,
        }
    }
}

impl Default for SandboxFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for SandboxFilter {
    fn init(&mut self, config: &PluginInstanceConfig) -> Result<(), PluginError> {
        if self.sandbox.is_some() {
            return Ok(());
        }
        self.restartable = config.get_bool("restartable").unwrap_or(false);
        let spec = spec_from_config(config).map_err(|e| PluginError::msg(e.to_string()))?;
        let sandbox = RhaiSandbox::init(spec, SandboxKind::Filter)
            .map_err(|e| PluginError::msg(e.to_string()))?;
        self.sandbox = Some(sandbox);
        Ok(())
    }

    fn restartable(&self) -> bool {
        self.restartable
    }

    fn cleanup_for_restart(&mut self) {
        // Persist durable state now so the replacement instance's init
        // finds it.
        if let Some(sandbox) = self.sandbox.take() {
            let _ = sandbox.destroy();
        }
    }
}

/// Await the next tick of an optional ticker, or never
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Filter for SandboxFilter {
    async fn run(&mut self, runner: &FoRunner, helper: &PluginHelper) -> Result<(), PluginError> {
        let Some(sandbox) = self.sandbox.as_mut() else {
            return Err(PluginError::msg("sandbox not running"));
        };
        let mut ticker = runner.ticker();

        loop {
            tokio::select! {
                maybe = runner.next_pack() => {
                    let Some(pack) = maybe else { return Ok(()) };

                    let input = pack.message().clone();
                    let (ret, batch) = sandbox.process_message(&input);
                    runner.recycle(pack);

                    if ret > 0 {
                        let reason = sandbox.last_error();
                        error!(filter = %runner.name(), error = %reason, "script fatal");
                        return Err(PluginError::msg(format!("FATAL: {reason}")));
                    }
                    // Negative returns were counted by the host; the batch
                    // is already discarded.

                    for mut msg in batch {
                        if msg.logger.is_none() {
                            msg.set_logger(runner.name());
                        }
                        if msg.hostname.is_none() {
                            msg.set_hostname(helper.hostname());
                        }
                        let fresh = helper.pool().acquire().await;
                        fresh.set_message(msg);
                        runner.inject(fresh);
                    }
                }
                _ = next_tick(&mut ticker) => {
                    if sandbox.timer_event(now_nanos()) > 0 {
                        let reason = sandbox.last_error();
                        error!(filter = %runner.name(), error = %reason, "timer_event fatal");
                        return Err(PluginError::msg(format!("FATAL: {reason}")));
                    }
                }
            }
        }
    }
}
