//! Sandbox decoder and filter adapter tests
//!
//! Drives the adapters through real pipeline runners: packs in, packs out,
//! recycle discipline observed from the pool gauges.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use strom_pipeline::{
    ConsumerKind, DecoderRunner, Filter, FoRunner, Globals, MatchRunner, Matcher, Message, Pack,
    Plugin, PluginHelper, PluginInstanceConfig, Router, RouterHandle,
};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::{SandboxDecoder, SandboxFilter};

const WAIT: Duration = Duration::from_secs(5);

fn script_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp script");
    file.write_all(body.as_bytes()).expect("write script");
    file
}

fn sandbox_config(file: &NamedTempFile) -> PluginInstanceConfig {
    PluginInstanceConfig::of_type("SandboxDecoder").with_option(
        "script_path",
        file.path().to_string_lossy().into_owned(),
    )
}

struct Rig {
    globals: Arc<Globals>,
    router_handle: RouterHandle,
    consumer_rx: mpsc::Receiver<Pack>,
}

/// Router with one catch-all consumer
fn rig() -> Rig {
    let globals = Globals::new(8, 4);
    let (mut router, router_handle) = Router::new(Arc::clone(&globals));
    let (tx, consumer_rx) = mpsc::channel(8);
    router.register(MatchRunner::new(
        "catch_all",
        ConsumerKind::Output,
        Arc::new(Matcher::parse("TRUE").expect("matcher")),
        tx,
    ));
    tokio::spawn(router.run());
    Rig {
        globals,
        router_handle,
        consumer_rx,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decoder_multi_inject_first_pack_is_original() {
    let file = script_file(
        r#"
fn process_message() {
    inject_message(read_message("Payload") + ":a", "txt", "a");
    inject_message(read_message("Payload") + ":b", "txt", "b");
    0
}
"#,
    );
    let mut rig = rig();

    let mut plugin = SandboxDecoder::new();
    plugin.init(&sandbox_config(&file)).expect("init");

    let (runner, handle) =
        DecoderRunner::new("sb", Arc::clone(&rig.globals), rig.router_handle.clone());
    let _task = runner.spawn(Box::new(plugin));

    let input = rig.globals.pool().acquire().await;
    {
        let mut msg = input.message_mut();
        *msg = Message::new("sandbox.input");
        msg.set_payload("seed");
        msg.set_hostname("seed.example");
    }
    let input_uuid = input.message().uuid.clone();
    let original = Arc::clone(&input);
    handle.send(input).await;

    // Exactly two packs arrive, the first being the original input pack,
    // both inheriting the input's headers.
    let first = timeout(WAIT, rig.consumer_rx.recv()).await.expect("p1").expect("open");
    let second = timeout(WAIT, rig.consumer_rx.recv()).await.expect("p2").expect("open");

    assert!(Arc::ptr_eq(&first, &original));
    assert!(!Arc::ptr_eq(&second, &original));
    assert_eq!(first.message().payload(), "seed:a");
    assert_eq!(second.message().payload(), "seed:b");
    for pack in [&first, &second] {
        let msg = pack.message();
        assert_eq!(msg.uuid, input_uuid);
        assert_eq!(msg.msg_type(), "sandbox.input");
        assert_eq!(msg.hostname(), "seed.example");
    }

    rig.globals.pool().recycle(first);
    rig.globals.pool().recycle(second);
    assert_eq!(rig.globals.pool().in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decoder_drop_and_soft_failure_recycle() {
    let file = script_file(
        r#"
fn process_message() {
    if read_message("Payload") == "bad" { -1 } else { 0 }
}
"#,
    );
    let mut rig = rig();

    let mut plugin = SandboxDecoder::new();
    plugin.init(&sandbox_config(&file)).expect("init");
    let (runner, handle) =
        DecoderRunner::new("sb", Arc::clone(&rig.globals), rig.router_handle.clone());
    let _task = runner.spawn(Box::new(plugin));

    for payload in ["good-but-silent", "bad"] {
        let pack = rig.globals.pool().acquire().await;
        pack.message_mut().set_payload(payload);
        handle.send(pack).await;
    }

    // Neither pack reaches the router: one dropped, one failed; both must
    // be recycled and the pipeline keeps running.
    timeout(WAIT, async {
        while rig.globals.pool().in_flight() != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("both packs recycled");
    assert!(rig.consumer_rx.try_recv().is_err());
    assert!(!rig.globals.is_stopping());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decoder_fatal_broadcasts_shutdown() {
    let file = script_file("fn process_message() { 7 }");
    let rig = rig();

    let mut plugin = SandboxDecoder::new();
    plugin.init(&sandbox_config(&file)).expect("init");
    let (runner, handle) =
        DecoderRunner::new("sb", Arc::clone(&rig.globals), rig.router_handle.clone());
    let _task = runner.spawn(Box::new(plugin));

    let pack = rig.globals.pool().acquire().await;
    pack.message_mut().set_payload("doomed");
    handle.send(pack).await;

    timeout(WAIT, rig.globals.shutdown_token().cancelled())
        .await
        .expect("fatal return must broadcast shutdown");
    assert!(rig.globals.is_stopping());
    assert!(rig.globals.is_faulted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filter_emits_through_guarded_inject() {
    let file = script_file(
        r#"
fn process_message() {
    inject_message("summary of " + read_message("Payload"), "txt", "summary");
    0
}
"#,
    );
    let mut rig = rig();

    let mut plugin = SandboxFilter::new();
    plugin.init(&sandbox_config(&file)).expect("init");

    // The filter's own matcher must not catch its emissions.
    let (filter_tx, filter_rx) = mpsc::channel(4);
    let runner = Arc::new(FoRunner::new(
        "sb_filter",
        ConsumerKind::Filter,
        Arc::clone(&rig.globals),
        rig.router_handle.clone(),
        Arc::new(Matcher::parse("Type == 'filter.input'").expect("matcher")),
        None,
        filter_rx,
    ));
    let helper = PluginHelper::new(
        Arc::clone(&rig.globals),
        rig.router_handle.clone(),
        Arc::new(Default::default()),
    );
    let run_task = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { plugin.run(&runner, &helper).await })
    };

    let pack = rig.globals.pool().acquire().await;
    {
        let mut msg = pack.message_mut();
        *msg = Message::new("filter.input");
        msg.set_payload("event");
    }
    filter_tx.send(pack).await.expect("filter queue open");

    let emitted = timeout(WAIT, rig.consumer_rx.recv())
        .await
        .expect("emission")
        .expect("open");
    assert_eq!(emitted.message().payload(), "summary of event");
    assert_eq!(emitted.message().logger(), "sb_filter");
    rig.globals.pool().recycle(emitted);

    // Closing the queue ends the run cleanly.
    drop(filter_tx);
    let result = timeout(WAIT, run_task).await.expect("run ends").expect("no panic");
    assert!(result.is_ok());
}
