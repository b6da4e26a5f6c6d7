//! Pipeline assembly and lifecycle
//!
//! `PipelineBuilder` turns a parsed config plus a plugin registry into a
//! `Pipeline`: every plugin instantiated and initialized, every matcher
//! compiled, every queue wired. All configuration problems surface here,
//! before anything starts.
//!
//! Startup order is sinks-first (outputs, filters, router, decoders,
//! inputs) so nothing is injected at a queue that is not yet drained.
//! Shutdown is the broadcast token plus cascading channel closure in flow
//! order, bounded by the configured drain timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use strom_config::{Config, PluginInstanceConfig};
use strom_matcher::Matcher;

use crate::error::{PipelineError, Result};
use crate::globals::Globals;
use crate::plugin::{PluginHelper, PluginKind, PluginRegistry, PluginWrapper};
use crate::router::{ConsumerKind, MatchRunner, Router, RouterMetrics};
use crate::runner::{
    DecoderHandle, DecoderRunner, FoRunner, InputRunner, spawn_filter, spawn_input, spawn_output,
};

/// Builds a ready-to-run pipeline from config
pub struct PipelineBuilder<'a> {
    config: &'a Config,
    registry: &'a PluginRegistry,
}

struct InputSlot {
    name: String,
    plugin: Box<dyn crate::plugin::Input>,
    wrapper: PluginWrapper,
    config: Arc<PluginInstanceConfig>,
}

struct FoSlot {
    name: String,
    kind: ConsumerKind,
    plugin: PluginKind,
    wrapper: PluginWrapper,
    config: Arc<PluginInstanceConfig>,
    matcher: Arc<Matcher>,
}

struct DecoderSlot {
    name: String,
    plugin: Box<dyn crate::plugin::Decoder>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(config: &'a Config, registry: &'a PluginRegistry) -> Self {
        Self { config, registry }
    }

    /// Instantiate, initialize, and wire everything
    ///
    /// Any error here is a startup failure: the caller reports it and
    /// exits non-zero.
    pub fn build(self) -> Result<Pipeline> {
        let globals = Globals::new(
            self.config.global.pool_size,
            self.config.global.plugin_chan_size,
        );
        let (mut router, router_handle) = Router::new(Arc::clone(&globals));

        let mut inputs = Vec::new();
        let mut fos = Vec::new();
        let mut decoders = Vec::new();

        // BTreeMap iteration keeps instantiation order deterministic.
        for (name, pcfg) in &self.config.plugins {
            let mut kind = self.registry.create(&pcfg.plugin_type).ok_or_else(|| {
                PipelineError::UnknownPluginType {
                    plugin: name.clone(),
                    plugin_type: pcfg.plugin_type.clone(),
                }
            })?;

            kind.plugin_mut()
                .init(pcfg)
                .map_err(|source| PipelineError::InitFailed {
                    plugin: name.clone(),
                    source,
                })?;

            let wrapper = self
                .registry
                .wrapper(&pcfg.plugin_type, name)
                .ok_or_else(|| PipelineError::UnknownPluginType {
                    plugin: name.clone(),
                    plugin_type: pcfg.plugin_type.clone(),
                })?;
            let pcfg_arc = Arc::new(pcfg.clone());

            match kind {
                PluginKind::Input(plugin) => inputs.push(InputSlot {
                    name: name.clone(),
                    plugin,
                    wrapper,
                    config: pcfg_arc,
                }),
                PluginKind::Decoder(plugin) => decoders.push(DecoderSlot {
                    name: name.clone(),
                    plugin,
                }),
                PluginKind::Filter(_) | PluginKind::Output(_) => {
                    let consumer_kind = match &kind {
                        PluginKind::Filter(_) => ConsumerKind::Filter,
                        _ => ConsumerKind::Output,
                    };
                    let source = pcfg.message_matcher.as_deref().ok_or_else(|| {
                        PipelineError::MissingMatcher {
                            plugin: name.clone(),
                        }
                    })?;
                    let matcher = Matcher::parse(source).map_err(|source| {
                        PipelineError::BadMatcher {
                            plugin: name.clone(),
                            source,
                        }
                    })?;
                    fos.push(FoSlot {
                        name: name.clone(),
                        kind: consumer_kind,
                        plugin: kind,
                        wrapper,
                        config: pcfg_arc,
                        matcher: Arc::new(matcher),
                    });
                }
            }
        }

        // Decoder runners exist before inputs so the name lookup below can
        // fail fast on a dangling reference.
        let mut decoder_handles: HashMap<String, DecoderHandle> = HashMap::new();
        let mut decoder_runners = Vec::new();
        for slot in decoders {
            let (runner, handle) =
                DecoderRunner::new(slot.name.as_str(), Arc::clone(&globals), router_handle.clone());
            decoder_handles.insert(slot.name.clone(), handle);
            decoder_runners.push((runner, slot.plugin));
        }

        // Sinks-first: outputs register ahead of filters, matching the
        // startup order; within a class, config order.
        fos.sort_by_key(|slot| match slot.kind {
            ConsumerKind::Output => 0,
            ConsumerKind::Filter => 1,
        });

        let mut fo_started = Vec::new();
        for slot in fos {
            let (tx, rx) = tokio::sync::mpsc::channel(globals.plugin_chan_size());
            router.register(MatchRunner::new(
                slot.name.as_str(),
                slot.kind,
                Arc::clone(&slot.matcher),
                tx,
            ));
            let runner = Arc::new(FoRunner::new(
                slot.name.as_str(),
                slot.kind,
                Arc::clone(&globals),
                router_handle.clone(),
                slot.matcher,
                slot.config.ticker_interval.map(Duration::from_secs),
                rx,
            ));
            fo_started.push((slot.name, slot.kind, slot.plugin, slot.wrapper, slot.config, runner));
        }

        let mut input_started = Vec::new();
        for slot in inputs {
            let decoder = match &slot.config.decoder {
                Some(dname) => Some(decoder_handles.get(dname).cloned().ok_or_else(|| {
                    PipelineError::UnknownDecoder {
                        plugin: slot.name.clone(),
                        decoder: dname.clone(),
                    }
                })?),
                None => None,
            };
            let runner = Arc::new(InputRunner::new(
                slot.name.as_str(),
                Arc::clone(&globals),
                router_handle.clone(),
                decoder,
                slot.config.ticker_interval.map(Duration::from_secs),
            ));
            input_started.push((slot.plugin, slot.wrapper, slot.config, runner));
        }

        let helper = PluginHelper::new(
            Arc::clone(&globals),
            router_handle.clone(),
            Arc::new(decoder_handles),
        );
        let metrics = router.metrics();

        Ok(Pipeline {
            globals,
            router: Some(router),
            router_metrics: metrics,
            helper,
            decoder_runners,
            fo_slots: fo_started,
            input_slots: input_started,
            drain_timeout: self.config.global.drain_timeout,
        })
    }
}

type FoStart = (
    String,
    ConsumerKind,
    PluginKind,
    PluginWrapper,
    Arc<PluginInstanceConfig>,
    Arc<FoRunner>,
);

type InputStart = (
    Box<dyn crate::plugin::Input>,
    PluginWrapper,
    Arc<PluginInstanceConfig>,
    Arc<InputRunner>,
);

/// A fully wired pipeline, ready to run
pub struct Pipeline {
    globals: Arc<Globals>,
    router: Option<Router>,
    router_metrics: Arc<RouterMetrics>,
    helper: PluginHelper,
    decoder_runners: Vec<(DecoderRunner, Box<dyn crate::plugin::Decoder>)>,
    fo_slots: Vec<FoStart>,
    input_slots: Vec<InputStart>,
    drain_timeout: Duration,
}

impl Pipeline {
    /// Shared state, for the binary's signal handler
    pub fn globals(&self) -> Arc<Globals> {
        Arc::clone(&self.globals)
    }

    /// Router counters, for periodic reporting
    pub fn router_metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.router_metrics)
    }

    /// Run until shutdown; clean shutdown yields `Ok`, a fault yields `Err`
    pub async fn run(mut self) -> Result<()> {
        let globals = Arc::clone(&self.globals);
        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();

        // Consumers first so every queue has a drain before producers start.
        for (name, kind, plugin, wrapper, config, runner) in self.fo_slots.drain(..) {
            let handle = match (kind, plugin) {
                (ConsumerKind::Filter, PluginKind::Filter(p)) => {
                    spawn_filter(p, wrapper, config, runner, self.helper.clone())
                }
                (ConsumerKind::Output, PluginKind::Output(p)) => {
                    spawn_output(p, wrapper, config, runner, self.helper.clone())
                }
                // Builder guarantees role/kind agreement.
                _ => continue,
            };
            tasks.push((name, handle));
        }

        let router = match self.router.take() {
            Some(r) => r,
            None => return Ok(()),
        };
        tasks.push(("router".to_string(), tokio::spawn(router.run())));

        for (runner, plugin) in self.decoder_runners.drain(..) {
            let name = runner.name().to_string();
            tasks.push((name, runner.spawn(plugin)));
        }

        for (plugin, wrapper, config, runner) in self.input_slots.drain(..) {
            let name = runner.name().to_string();
            tasks.push((
                name,
                spawn_input(plugin, wrapper, config, runner, self.helper.clone()),
            ));
        }

        info!(tasks = tasks.len(), "pipeline running");

        // Everything is spawned; wait for the broadcast.
        globals.shutdown_token().cancelled().await;

        // Drop our producer handles so channel closure cascades in flow
        // order once the runners exit.
        drop(self.helper);

        let drain = self.drain_timeout;
        let joined = tokio::time::timeout(drain, async {
            for (_, task) in &mut tasks {
                let _ = task.await;
            }
        })
        .await;

        if joined.is_err() {
            warn!(timeout = ?drain, "drain period expired; aborting stragglers");
            for (name, task) in &tasks {
                if !task.is_finished() {
                    warn!(plugin = %name, "aborted during shutdown");
                    task.abort();
                }
            }
        }

        if globals.is_faulted() {
            Err(PipelineError::Faulted)
        } else {
            Ok(())
        }
    }
}
