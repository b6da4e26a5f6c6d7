//! The Rhai-backed script host

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use prost::Message as ProstMessage;
use rand::Rng;
use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};
use strom_protocol::{Field, FieldValue, Message};
use tracing::warn;

use crate::usage::{Resource, Stat, UsageMeters};
use crate::{
    DEFAULT_INSTRUCTION_LIMIT, DEFAULT_MEMORY_LIMIT, DEFAULT_OUTPUT_LIMIT,
    DEFAULT_SAMPLE_DENOMINATOR, Result, SandboxError,
};

/// Which pipeline role drives this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    Decoder,
    Filter,
}

/// Limits and file locations for one script host instance
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// The Rhai script to load
    pub script_path: PathBuf,

    /// Cap on the serialized size of durable script state (bytes)
    pub memory_limit: usize,

    /// Rhai operations permitted per `process_message` call; 0 disables
    pub instruction_limit: u64,

    /// Bytes injectable per `process_message` call
    pub output_limit: usize,

    /// Where durable state is written on destroy and read on init
    pub preserve_path: Option<PathBuf>,

    /// Sample wall-clock duration on 1-in-K calls
    pub sample_denominator: u32,
}

impl SandboxSpec {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            preserve_path: None,
            sample_denominator: DEFAULT_SAMPLE_DENOMINATOR,
        }
    }
}

/// State the registered host functions share with the host
struct SharedState {
    /// Input message of the in-flight `process_message` call
    input: Mutex<Message>,
    /// Messages injected so far in the in-flight call
    injected: Mutex<Vec<Message>>,
    /// Durable script state, serialized as JSON across restarts
    state: Mutex<serde_json::Map<String, serde_json::Value>>,
    usage: UsageMeters,
    last_error: Mutex<String>,
    output_limit: usize,
    memory_limit: usize,
}

enum InjectPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl SharedState {
    /// The inject-message callback body shared by both overloads
    fn inject(&self, payload: InjectPayload, ptype: &str, pname: &str) -> i64 {
        let size = match &payload {
            InjectPayload::Text(s) => s.len(),
            InjectPayload::Binary(b) => b.len(),
        } as u64;
        if self.usage.add_current(Resource::Output, size) > self.output_limit as u64 {
            *self.last_error.lock() = "output limit exceeded".to_string();
            return 2;
        }

        let mut out = if ptype.is_empty() {
            // Binary-encoded message: decode wholesale.
            let bytes = match payload {
                InjectPayload::Binary(b) => b,
                InjectPayload::Text(s) => s.into_bytes(),
            };
            match Message::decode(bytes.as_slice()) {
                Ok(msg) => msg,
                Err(_) => return 1,
            }
        } else {
            let text = match payload {
                InjectPayload::Text(s) => s,
                InjectPayload::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            };
            let mut msg = Message::default();
            msg.set_payload(text);
            msg.add_field(Field::string("payload_type", ptype).with_representation("file-extension"));
            msg.add_field(Field::string("payload_name", pname));
            msg
        };

        // Standard headers left unset inherit the original input's values.
        self.input.lock().fill_missing_headers(&mut out);
        self.injected.lock().push(out);
        0
    }

    /// Read one addressable piece of the current input message
    fn read(&self, spec: &str) -> Dynamic {
        let msg = self.input.lock();
        match spec {
            "Type" => msg.msg_type().into(),
            "Logger" => msg.logger().into(),
            "Hostname" => msg.hostname().into(),
            "Payload" => msg.payload().into(),
            "EnvVersion" => msg.env_version().into(),
            "Uuid" => Dynamic::from_blob(msg.uuid.clone()),
            "Timestamp" => msg.timestamp.into(),
            "Severity" => i64::from(msg.severity()).into(),
            "Pid" => i64::from(msg.pid()).into(),
            _ => {
                // Fields[name]
                let name = spec
                    .strip_prefix("Fields[")
                    .and_then(|s| s.strip_suffix(']'));
                match name.and_then(|n| msg.field_value(n, 0)) {
                    Some(FieldValue::String(s)) => s.into(),
                    Some(FieldValue::Bytes(b)) => Dynamic::from_blob(b.to_vec()),
                    Some(FieldValue::Integer(i)) => i.into(),
                    Some(FieldValue::Double(d)) => d.into(),
                    Some(FieldValue::Bool(b)) => b.into(),
                    None => Dynamic::UNIT,
                }
            }
        }
    }

    /// Store one durable state entry, enforcing the memory limit
    fn state_set(&self, key: &str, value: Dynamic) -> bool {
        let json = match rhai::serde::from_dynamic::<serde_json::Value>(&value) {
            Ok(v) => v,
            Err(_) => return false,
        };
        let mut map = self.state.lock();
        let previous = map.insert(key.to_string(), json);
        let size = serde_json::to_string(&*map).map(|s| s.len()).unwrap_or(usize::MAX);
        if size > self.memory_limit {
            // Roll back so the limit cannot be breached incrementally.
            match previous {
                Some(old) => {
                    map.insert(key.to_string(), old);
                }
                None => {
                    map.remove(key);
                }
            }
            *self.last_error.lock() = "memory limit exceeded".to_string();
            return false;
        }
        self.usage.set_current(Resource::Memory, size as u64);
        true
    }

    fn state_get(&self, key: &str) -> Dynamic {
        let map = self.state.lock();
        match map.get(key) {
            Some(v) => rhai::serde::to_dynamic(v).unwrap_or(Dynamic::UNIT),
            None => Dynamic::UNIT,
        }
    }
}

/// One loaded script instance with its engine, limits, and meters
pub struct RhaiSandbox {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    kind: SandboxKind,
    spec: SandboxSpec,
    state: Arc<SharedState>,
    has_timer_event: bool,
    sample: bool,
}

impl RhaiSandbox {
    /// Load, compile, and initialize a script
    ///
    /// Runs the script's top-level statements once, then (when configured)
    /// loads preserved state saved by a previous instance's destroy.
    pub fn init(spec: SandboxSpec, kind: SandboxKind) -> Result<Self> {
        let source = std::fs::read_to_string(&spec.script_path).map_err(|source| {
            SandboxError::ScriptRead {
                path: spec.script_path.clone(),
                source,
            }
        })?;

        let state = Arc::new(SharedState {
            input: Mutex::new(Message::default()),
            injected: Mutex::new(Vec::new()),
            state: Mutex::new(serde_json::Map::new()),
            usage: UsageMeters::default(),
            last_error: Mutex::new(String::new()),
            output_limit: spec.output_limit,
            memory_limit: spec.memory_limit,
        });

        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        // Output and state sizes are enforced by the host's own meters;
        // this cap only stops a single runaway string.
        engine.set_max_string_size(16 * 1024 * 1024);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(10_000);

        let instruction_limit = spec.instruction_limit;
        {
            let state = Arc::clone(&state);
            engine.on_progress(move |ops| {
                state.usage.set_current(Resource::Instructions, ops);
                if instruction_limit > 0 && ops > instruction_limit {
                    Some("instruction limit exceeded".into())
                } else {
                    None
                }
            });
        }

        {
            let state = Arc::clone(&state);
            engine.register_fn(
                "inject_message",
                move |payload: &str, ptype: &str, pname: &str| -> i64 {
                    state.inject(InjectPayload::Text(payload.to_string()), ptype, pname)
                },
            );
        }
        {
            let state = Arc::clone(&state);
            engine.register_fn(
                "inject_message",
                move |payload: rhai::Blob, ptype: &str, pname: &str| -> i64 {
                    state.inject(InjectPayload::Binary(payload), ptype, pname)
                },
            );
        }
        {
            let state = Arc::clone(&state);
            engine.register_fn("read_message", move |spec: &str| -> Dynamic {
                state.read(spec)
            });
        }
        {
            let state = Arc::clone(&state);
            engine.register_fn("state_set", move |key: &str, value: Dynamic| -> bool {
                state.state_set(key, value)
            });
        }
        {
            let state = Arc::clone(&state);
            engine.register_fn("state_get", move |key: &str| -> Dynamic {
                state.state_get(key)
            });
        }

        let ast = engine.compile(&source).map_err(|e| SandboxError::Compile {
            path: spec.script_path.clone(),
            reason: e.to_string(),
        })?;

        if !ast.iter_functions().any(|f| f.name == "process_message") {
            return Err(SandboxError::MissingEntryPoint {
                path: spec.script_path.clone(),
            });
        }
        let has_timer_event = ast.iter_functions().any(|f| f.name == "timer_event");

        let mut scope = Scope::new();
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| SandboxError::InitEval {
                path: spec.script_path.clone(),
                reason: e.to_string(),
            })?;

        let sandbox = Self {
            engine,
            ast,
            scope,
            kind,
            spec,
            state,
            has_timer_event,
            sample: true,
        };
        sandbox.load_preserved()?;
        Ok(sandbox)
    }

    fn load_preserved(&self) -> Result<()> {
        let Some(path) = &self.spec.preserve_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let text = std::fs::read_to_string(path).map_err(|e| SandboxError::PreservedLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| SandboxError::PreservedLoad {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        self.state
            .usage
            .set_current(Resource::Memory, text.len() as u64);
        *self.state.state.lock() = map;
        Ok(())
    }

    /// Role this host was initialized for
    pub fn kind(&self) -> SandboxKind {
        self.kind
    }

    /// Drive one input message through the script
    ///
    /// Returns the script's status code (0 success, > 0 fatal, < 0
    /// non-fatal failure) and the batch of messages it injected. The batch
    /// is empty on any non-zero return.
    pub fn process_message(&mut self, input: &Message) -> (i64, Vec<Message>) {
        *self.state.input.lock() = input.clone();
        self.state.injected.lock().clear();
        self.state.usage.set_current(Resource::Instructions, 0);
        self.state.usage.set_current(Resource::Output, 0);
        self.state
            .usage
            .process_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let start = self.sample.then(Instant::now);
        let ret = self.call_script_fn("process_message", ());
        if let Some(start) = start {
            self.state
                .usage
                .record_duration(start.elapsed().as_nanos() as u64);
        }
        let denom = self.spec.sample_denominator.max(1);
        self.sample = rand::rng().random_range(0..denom) == 0;

        if ret < 0 {
            self.state
                .usage
                .process_failures
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        if ret != 0 {
            self.state.injected.lock().clear();
            return (ret, Vec::new());
        }
        let batch = std::mem::take(&mut *self.state.injected.lock());
        (0, batch)
    }

    /// Deliver a timer tick to the script's `timer_event`, when it has one
    pub fn timer_event(&mut self, ns: i64) -> i64 {
        if !self.has_timer_event {
            return 0;
        }
        self.call_script_fn("timer_event", (ns,))
    }

    fn call_script_fn(&mut self, name: &str, args: impl rhai::FuncArgs) -> i64 {
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        match self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut self.scope,
            &self.ast,
            name,
            args,
        ) {
            Ok(value) => match value.as_int() {
                Ok(code) => code,
                Err(_) => {
                    *self.state.last_error.lock() =
                        format!("{name} must return an integer status");
                    1
                }
            },
            Err(e) => {
                *self.state.last_error.lock() = e.to_string();
                1
            }
        }
    }

    /// Most recent script-level error, for fatal reporting
    pub fn last_error(&self) -> String {
        self.state.last_error.lock().clone()
    }

    /// Snapshot of the script's durable state, for reporting
    pub fn state_snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.state.state.lock().clone()
    }

    /// Read one resource meter
    pub fn usage(&self, resource: Resource, stat: Stat) -> u64 {
        self.state.usage.usage(resource, stat)
    }

    /// The host's meters, including process counters and sampled durations
    pub fn meters(&self) -> &UsageMeters {
        &self.state.usage
    }

    /// Tear the host down, writing durable state when configured
    pub fn destroy(self) -> Result<()> {
        let Some(path) = &self.spec.preserve_path else {
            return Ok(());
        };
        let map = self.state.state.lock();
        if map.is_empty() {
            return Ok(());
        }
        let text = serde_json::to_string(&*map).unwrap_or_else(|_| "{}".to_string());
        if let Err(source) = std::fs::write(path, text) {
            warn!(path = %path.display(), "failed to preserve sandbox state");
            return Err(SandboxError::PreservedWrite {
                path: path.clone(),
                source,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RhaiSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiSandbox")
            .field("script", &self.spec.script_path)
            .field("kind", &self.kind)
            .finish()
    }
}
