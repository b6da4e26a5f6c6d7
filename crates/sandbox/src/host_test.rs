//! Script host tests

use std::io::Write;

use prost::Message as ProstMessage;
use strom_protocol::{Field, Message};
use tempfile::NamedTempFile;

use crate::host::{RhaiSandbox, SandboxKind, SandboxSpec};
use crate::{Resource, SandboxError, Stat};

fn script_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp script");
    file.write_all(body.as_bytes()).expect("write script");
    file
}

fn sandbox(body: &str) -> (RhaiSandbox, NamedTempFile) {
    let file = script_file(body);
    let mut spec = SandboxSpec::new(file.path());
    spec.sample_denominator = 1; // sample every call in tests
    let sb = RhaiSandbox::init(spec, SandboxKind::Decoder).expect("init");
    (sb, file)
}

fn input_message() -> Message {
    let mut msg = Message::new("host.test");
    msg.set_logger("host_test");
    msg.set_hostname("origin.example");
    msg.set_payload("raw line");
    msg.set_severity(4);
    msg.set_pid(77);
    msg
}

#[test]
fn test_missing_entry_point_rejected() {
    let file = script_file("fn not_the_right_fn() { 0 }");
    let spec = SandboxSpec::new(file.path());
    match RhaiSandbox::init(spec, SandboxKind::Decoder) {
        Err(SandboxError::MissingEntryPoint { .. }) => {}
        other => panic!("expected MissingEntryPoint, got {other:?}"),
    }
}

#[test]
fn test_compile_error_rejected() {
    let file = script_file("fn process_message( {");
    let spec = SandboxSpec::new(file.path());
    assert!(matches!(
        RhaiSandbox::init(spec, SandboxKind::Decoder),
        Err(SandboxError::Compile { .. })
    ));
}

#[test]
fn test_single_payload_injection_inherits_headers() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    let payload = read_message("Payload");
    inject_message(payload + " [seen]", "txt", "out");
    0
}
"#,
    );

    let input = input_message();
    let (ret, batch) = sb.process_message(&input);
    assert_eq!(ret, 0);
    assert_eq!(batch.len(), 1);

    let out = &batch[0];
    assert_eq!(out.payload(), "raw line [seen]");
    // Unset standard headers come from the input message.
    assert_eq!(out.uuid, input.uuid);
    assert_eq!(out.timestamp, input.timestamp);
    assert_eq!(out.msg_type(), "host.test");
    assert_eq!(out.hostname(), "origin.example");
    assert_eq!(out.severity(), 4);
    assert_eq!(out.pid(), 77);
    // The payload-path injection appends the two synthesized fields.
    let ptype = out.field("payload_type").expect("payload_type field");
    assert_eq!(ptype.representation.as_deref(), Some("file-extension"));
    assert_eq!(
        out.field_value("payload_name", 0),
        Some(strom_protocol::FieldValue::String("out"))
    );
}

#[test]
fn test_multi_inject_yields_one_message_per_call() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    inject_message("first", "txt", "a");
    inject_message("second", "txt", "b");
    0
}
"#,
    );

    let input = input_message();
    let (ret, batch) = sb.process_message(&input);
    assert_eq!(ret, 0);
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|m| m.uuid == input.uuid));
    assert!(batch.iter().all(|m| m.timestamp == input.timestamp));
    assert_eq!(batch[0].payload(), "first");
    assert_eq!(batch[1].payload(), "second");
}

#[test]
fn test_binary_injection_decodes_message() {
    // The input carries a complete encoded message in a bytes field; the
    // script re-injects it over the binary path.
    let mut inner = Message::new("inner.type");
    inner.set_payload("inner payload");
    inner.set_hostname("inner.example");
    let mut encoded = Vec::new();
    inner.encode(&mut encoded).unwrap();

    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    let blob = read_message("Fields[embedded]");
    inject_message(blob, "", "")
}
"#,
    );

    let mut input = input_message();
    input.add_field(Field::bytes("embedded", encoded));

    let (ret, batch) = sb.process_message(&input);
    assert_eq!(ret, 0);
    assert_eq!(batch.len(), 1);
    let out = &batch[0];
    assert_eq!(out.msg_type(), "inner.type");
    assert_eq!(out.payload(), "inner payload");
    // Headers set by the decoded message win over the input's.
    assert_eq!(out.hostname(), "inner.example");
    assert_eq!(out.uuid, inner.uuid);
}

#[test]
fn test_binary_injection_decode_failure_returns_one_to_script() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    let rc = inject_message(read_message("Fields[garbage]"), "", "");
    if rc == 1 { -1 } else { 9 }
}
"#,
    );

    let mut input = input_message();
    input.add_field(Field::bytes("garbage", vec![0xFFu8, 0xFF, 0xFF, 0xFF]));

    let (ret, batch) = sb.process_message(&input);
    assert_eq!(ret, -1, "script saw rc 1 and turned it into a soft failure");
    assert!(batch.is_empty(), "failed batch must be cleared");
    assert_eq!(
        sb.meters()
            .process_failures
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[test]
fn test_read_message_headers_and_fields() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    let summary = read_message("Type") + "|"
        + read_message("Logger") + "|"
        + read_message("Severity").to_string() + "|"
        + read_message("Fields[service]") + "|"
        + read_message("Fields[missing]").to_string();
    inject_message(summary, "txt", "summary");
    0
}
"#,
    );

    let mut input = input_message();
    input.add_field(Field::string("service", "ingest"));

    let (ret, batch) = sb.process_message(&input);
    assert_eq!(ret, 0);
    assert_eq!(batch[0].payload(), "host.test|host_test|4|ingest|");
}

#[test]
fn test_script_runtime_error_is_fatal() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    this_function_does_not_exist();
    0
}
"#,
    );

    let (ret, batch) = sb.process_message(&input_message());
    assert_eq!(ret, 1);
    assert!(batch.is_empty());
    assert!(!sb.last_error().is_empty());
}

#[test]
fn test_instruction_limit_terminates_script() {
    let file = script_file(
        r#"
fn process_message() {
    let x = 0;
    loop { x += 1; }
    0
}
"#,
    );
    let mut spec = SandboxSpec::new(file.path());
    spec.instruction_limit = 10_000;
    let mut sb = RhaiSandbox::init(spec, SandboxKind::Decoder).expect("init");

    let (ret, _) = sb.process_message(&input_message());
    assert!(ret > 0, "runaway script must be fatal");
    assert!(sb.last_error().contains("instruction limit"));
    assert!(sb.usage(Resource::Instructions, Stat::Maximum) >= 10_000);
}

#[test]
fn test_output_limit_reported_to_script() {
    let file = script_file(
        r#"
fn process_message() {
    let rc = inject_message("0123456789012345678901234567890123456789", "txt", "big");
    rc
}
"#,
    );
    let mut spec = SandboxSpec::new(file.path());
    spec.output_limit = 16;
    let mut sb = RhaiSandbox::init(spec, SandboxKind::Decoder).expect("init");

    let (ret, batch) = sb.process_message(&input_message());
    assert!(ret > 0);
    assert!(batch.is_empty());
    assert!(sb.last_error().contains("output limit"));
}

#[test]
fn test_usage_meters_track_calls() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() {
    inject_message("12345", "txt", "n");
    0
}
"#,
    );

    for _ in 0..3 {
        let (ret, _) = sb.process_message(&input_message());
        assert_eq!(ret, 0);
    }

    let meters = sb.meters();
    assert_eq!(meters.process_count.load(std::sync::atomic::Ordering::Relaxed), 3);
    assert!(sb.usage(Resource::Instructions, Stat::Maximum) > 0);
    assert_eq!(sb.usage(Resource::Output, Stat::Maximum), 5);
    // Denominator 1 samples every call.
    assert_eq!(meters.duration_samples(), 3);
}

#[test]
fn test_timer_event_dispatch() {
    let (mut sb, _file) = sandbox(
        r#"
fn process_message() { 0 }
fn timer_event(ns) {
    state_set("last_tick", ns);
    0
}
"#,
    );

    assert_eq!(sb.timer_event(123_456), 0);
    assert_eq!(
        sb.state_snapshot().get("last_tick"),
        Some(&serde_json::json!(123_456))
    );
}

#[test]
fn test_timer_event_absent_is_noop() {
    let (mut sb, _file) = sandbox("fn process_message() { 0 }");
    assert_eq!(sb.timer_event(1), 0);
}

#[test]
fn test_state_preserved_across_destroy_and_init() {
    let file = script_file(
        r#"
fn process_message() {
    let n = state_get("count");
    let n = if n == () { 0 } else { n };
    state_set("count", n + 1);
    0
}
"#,
    );
    let preserve = NamedTempFile::new().expect("preserve file");
    let preserve_path = preserve.path().to_path_buf();
    drop(preserve); // only the path is wanted; the host writes the file

    let mut spec = SandboxSpec::new(file.path());
    spec.preserve_path = Some(preserve_path.clone());

    let mut sb = RhaiSandbox::init(spec.clone(), SandboxKind::Filter).expect("init");
    for _ in 0..4 {
        sb.process_message(&input_message());
    }
    assert_eq!(sb.state_snapshot().get("count"), Some(&serde_json::json!(4)));
    sb.destroy().expect("destroy writes state");

    // A fresh instance picks the counter back up.
    let mut sb = RhaiSandbox::init(spec, SandboxKind::Filter).expect("re-init");
    assert_eq!(sb.state_snapshot().get("count"), Some(&serde_json::json!(4)));
    sb.process_message(&input_message());
    assert_eq!(sb.state_snapshot().get("count"), Some(&serde_json::json!(5)));

    let _ = std::fs::remove_file(preserve_path);
}

#[test]
fn test_memory_limit_rejects_oversized_state() {
    let file = script_file(
        r#"
fn process_message() {
    let big = "x";
    big.pad(4096, 'x');
    if state_set("big", big) { 0 } else { -2 }
}
"#,
    );
    let mut spec = SandboxSpec::new(file.path());
    spec.memory_limit = 256;
    let mut sb = RhaiSandbox::init(spec, SandboxKind::Decoder).expect("init");

    let (ret, _) = sb.process_message(&input_message());
    assert_eq!(ret, -2);
    assert!(sb.last_error().contains("memory limit"));
    assert!(sb.state_snapshot().is_empty(), "over-limit set must roll back");
}
