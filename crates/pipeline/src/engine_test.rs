//! End-to-end pipeline assembly tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout;

use crate::plugin::{Input, Output, Plugin, PluginHelper, PluginKind, PluginRegistry};
use crate::runner::{FoRunner, InputRunner};
use crate::{Message, PipelineBuilder, PipelineError, PluginError, PluginInstanceConfig};
use strom_config::Config;

const WAIT: Duration = Duration::from_secs(5);

/// Input that emits `count` messages of type "emit.test" then parks
struct EmitInput {
    count: usize,
}

impl Plugin for EmitInput {
    fn init(&mut self, config: &PluginInstanceConfig) -> Result<(), PluginError> {
        self.count = config.get_int("count").unwrap_or(0) as usize;
        Ok(())
    }
}

#[async_trait]
impl Input for EmitInput {
    async fn run(&mut self, runner: &InputRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        for i in 0..self.count {
            let Some(pack) = runner.new_pack().await else {
                return Ok(());
            };
            {
                let mut msg = pack.message_mut();
                *msg = Message::new("emit.test");
                msg.set_payload(format!("payload {i}"));
            }
            runner.inject(pack).await;
        }
        runner.shutdown().cancelled().await;
        Ok(())
    }
}

/// Output that records every payload it consumes
struct CollectOutput {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Plugin for CollectOutput {
    fn init(&mut self, _config: &PluginInstanceConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl Output for CollectOutput {
    async fn run(&mut self, runner: &FoRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        while let Some(pack) = runner.next_pack().await {
            self.seen.lock().push(pack.message().payload().to_string());
            runner.recycle(pack);
        }
        Ok(())
    }
}

fn test_registry(seen: &Arc<Mutex<Vec<String>>>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register("EmitInput", || PluginKind::Input(Box::new(EmitInput { count: 0 })));
    let seen = Arc::clone(seen);
    registry.register("CollectOutput", move || {
        PluginKind::Output(Box::new(CollectOutput {
            seen: Arc::clone(&seen),
        }))
    });
    registry
}

fn test_config() -> Config {
    let mut plugins = BTreeMap::new();
    plugins.insert(
        "emitter".to_string(),
        PluginInstanceConfig::of_type("EmitInput").with_option("count", 3i64),
    );
    plugins.insert(
        "collector".to_string(),
        PluginInstanceConfig::of_type("CollectOutput").with_matcher("Type == 'emit.test'"),
    );
    Config {
        plugins,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_flow_and_clean_shutdown() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = test_registry(&seen);
    let config = test_config();

    let pipeline = PipelineBuilder::new(&config, &registry).build().expect("build");
    let globals = pipeline.globals();
    let task = tokio::spawn(pipeline.run());

    timeout(WAIT, async {
        while seen.lock().len() < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("all messages should reach the output");

    globals.shut_down();
    let result = timeout(WAIT, task).await.expect("run returns").expect("no panic");
    assert!(result.is_ok(), "clean shutdown should not report a fault");

    // Ordering from a single input is preserved through the router.
    assert_eq!(
        *seen.lock(),
        vec!["payload 0", "payload 1", "payload 2"],
    );

    // Every pack went home.
    assert_eq!(globals.pool().in_flight(), 0);
}

#[test]
fn test_build_rejects_unknown_type() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = test_registry(&seen);
    let mut config = test_config();
    config
        .plugins
        .insert("bogus".into(), PluginInstanceConfig::of_type("NoSuchPlugin"));

    match PipelineBuilder::new(&config, &registry).build() {
        Err(PipelineError::UnknownPluginType { plugin, plugin_type }) => {
            assert_eq!(plugin, "bogus");
            assert_eq!(plugin_type, "NoSuchPlugin");
        }
        other => panic!("expected UnknownPluginType, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_build_requires_matcher_on_outputs() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = test_registry(&seen);
    let mut config = test_config();
    config
        .plugins
        .insert("bare".into(), PluginInstanceConfig::of_type("CollectOutput"));

    assert!(matches!(
        PipelineBuilder::new(&config, &registry).build(),
        Err(PipelineError::MissingMatcher { .. })
    ));
}

#[test]
fn test_build_rejects_bad_matcher() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = test_registry(&seen);
    let mut config = test_config();
    config.plugins.insert(
        "broken".into(),
        PluginInstanceConfig::of_type("CollectOutput").with_matcher("Nope =="),
    );

    assert!(matches!(
        PipelineBuilder::new(&config, &registry).build(),
        Err(PipelineError::BadMatcher { .. })
    ));
}

#[test]
fn test_build_rejects_dangling_decoder_reference() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = test_registry(&seen);
    let mut config = test_config();
    let mut emitter = PluginInstanceConfig::of_type("EmitInput").with_option("count", 1i64);
    emitter.decoder = Some("ghost".into());
    config.plugins.insert("emitter".into(), emitter);

    assert!(matches!(
        PipelineBuilder::new(&config, &registry).build(),
        Err(PipelineError::UnknownDecoder { .. })
    ));
}
