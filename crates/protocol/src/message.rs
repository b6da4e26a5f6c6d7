//! The pipeline record type
//!
//! `Message` is the unit of data that flows through the pipeline. The struct
//! is wire-compatible with a protobuf schema (all tags fixed below) so that
//! records survive transport between daemons byte-identically.
//!
//! # Headers and fields
//!
//! A message carries a fixed set of optional headers (type, logger, severity,
//! payload, env_version, pid, hostname) plus an ordered list of typed named
//! `Field`s. Missing string headers read as `""`, severity defaults to 7 and
//! pid to 0, mirroring the protobuf defaults.

use prost::Message as ProstMessage;
use serde::Serialize;
use uuid::Uuid;

use crate::{ProtocolError, Result, UUID_SIZE};

/// Default severity when the header is unset (protobuf default)
pub const DEFAULT_SEVERITY: i32 = 7;

/// Structured log/event record
#[derive(Clone, PartialEq, Serialize, ::prost::Message)]
pub struct Message {
    /// 16-byte record UUID
    #[prost(bytes = "vec", tag = "1")]
    #[serde(serialize_with = "serialize_uuid")]
    pub uuid: Vec<u8>,

    /// Nanoseconds since the Unix epoch
    #[prost(int64, tag = "2")]
    pub timestamp: i64,

    /// Free-form record type, e.g. "counter-output"
    #[prost(string, optional, tag = "3")]
    #[serde(rename = "type")]
    pub msg_type: Option<String>,

    /// Name of the emitting component
    #[prost(string, optional, tag = "4")]
    pub logger: Option<String>,

    /// Syslog-style severity; unset reads as 7 (debug)
    #[prost(int32, optional, tag = "5", default = "7")]
    pub severity: Option<i32>,

    /// Record body
    #[prost(string, optional, tag = "6")]
    pub payload: Option<String>,

    /// Schema version of the envelope
    #[prost(string, optional, tag = "7")]
    pub env_version: Option<String>,

    /// Process id of the emitter
    #[prost(int32, optional, tag = "8")]
    pub pid: Option<i32>,

    /// Host the record originated on
    #[prost(string, optional, tag = "9")]
    pub hostname: Option<String>,

    /// Ordered list of typed named values
    #[prost(message, repeated, tag = "10")]
    pub fields: Vec<Field>,
}

/// Typed named value attached to a message
///
/// The value kind is carried in `value_type`; values live in the repeated
/// array matching that kind. Multi-valued fields are legal (all indices of
/// the typed array).
#[derive(Clone, PartialEq, Serialize, ::prost::Message)]
pub struct Field {
    #[prost(string, tag = "1")]
    pub name: String,

    /// Discriminant into the value arrays; unset reads as `String`
    #[prost(enumeration = "ValueType", optional, tag = "2")]
    pub value_type: Option<i32>,

    /// Free-form hint about the value encoding, e.g. "file-extension"
    #[prost(string, optional, tag = "3")]
    pub representation: Option<String>,

    #[prost(string, repeated, tag = "4")]
    pub value_string: Vec<String>,
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub value_bytes: Vec<Vec<u8>>,
    #[prost(int64, repeated, tag = "6")]
    pub value_integer: Vec<i64>,
    #[prost(double, repeated, tag = "7")]
    pub value_double: Vec<f64>,
    #[prost(bool, repeated, tag = "8")]
    pub value_bool: Vec<bool>,
}

/// Value kind discriminant for `Field`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValueType {
    String = 0,
    Bytes = 1,
    Integer = 2,
    Double = 3,
    Bool = 4,
}

/// Borrowed view of one field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    String(&'a str),
    Bytes(&'a [u8]),
    Integer(i64),
    Double(f64),
    Bool(bool),
}

impl Message {
    /// Create a message with a fresh UUID and the current timestamp
    pub fn new(msg_type: impl Into<String>) -> Self {
        let mut msg = Self::default();
        msg.set_uuid(Uuid::new_v4());
        msg.timestamp = now_nanos();
        msg.msg_type = Some(msg_type.into());
        msg
    }

    /// Parse the UUID header; `None` when unset or malformed
    pub fn uuid(&self) -> Option<Uuid> {
        Uuid::from_slice(&self.uuid).ok()
    }

    /// Set the UUID header from a parsed UUID
    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = uuid.as_bytes().to_vec();
    }

    /// Set the UUID header from raw bytes, validating the length
    pub fn set_uuid_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != UUID_SIZE {
            return Err(ProtocolError::InvalidUuid(bytes.len()));
        }
        self.uuid = bytes.to_vec();
        Ok(())
    }

    // `msg_type()`, `logger()`, `hostname()`, `payload()`, `env_version()`,
    // `severity()`, and `pid()` accessors are generated by the `::prost::Message`
    // derive above from each field's `optional`/`default` attributes.

    pub fn set_type(&mut self, t: impl Into<String>) {
        self.msg_type = Some(t.into());
    }

    pub fn set_logger(&mut self, l: impl Into<String>) {
        self.logger = Some(l.into());
    }

    pub fn set_hostname(&mut self, h: impl Into<String>) {
        self.hostname = Some(h.into());
    }

    pub fn set_payload(&mut self, p: impl Into<String>) {
        self.payload = Some(p.into());
    }

    pub fn set_severity(&mut self, s: i32) {
        self.severity = Some(s);
    }

    pub fn set_pid(&mut self, pid: i32) {
        self.pid = Some(pid);
    }

    /// Append a field, preserving insertion order
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// First field with the given name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Value at `index` of the first field with the given name
    pub fn field_value(&self, name: &str, index: usize) -> Option<FieldValue<'_>> {
        self.field(name).and_then(|f| f.value(index))
    }

    /// Copy every header (not fields, not payload) that is set on `self`
    /// into the corresponding unset slot of `dst`.
    pub fn fill_missing_headers(&self, dst: &mut Message) {
        if dst.uuid.is_empty() && !self.uuid.is_empty() {
            dst.uuid = self.uuid.clone();
        }
        if dst.timestamp == 0 {
            dst.timestamp = self.timestamp;
        }
        if dst.msg_type.is_none() {
            dst.msg_type = self.msg_type.clone();
        }
        if dst.logger.is_none() {
            dst.logger = self.logger.clone();
        }
        if dst.severity.is_none() {
            dst.severity = self.severity;
        }
        if dst.pid.is_none() {
            dst.pid = self.pid;
        }
        if dst.hostname.is_none() {
            dst.hostname = self.hostname.clone();
        }
    }

    /// Snapshot of the headers alone, for later back-filling
    pub fn headers_only(&self) -> Message {
        Message {
            uuid: self.uuid.clone(),
            timestamp: self.timestamp,
            msg_type: self.msg_type.clone(),
            logger: self.logger.clone(),
            severity: self.severity,
            payload: None,
            env_version: None,
            pid: self.pid,
            hostname: self.hostname.clone(),
            fields: Vec::new(),
        }
    }

    /// Encoded size on the wire
    pub fn encoded_size(&self) -> usize {
        self.encoded_len()
    }

    /// Reset to the zero message, retaining allocated capacity where possible
    pub fn clear(&mut self) {
        self.uuid.clear();
        self.timestamp = 0;
        self.msg_type = None;
        self.logger = None;
        self.severity = None;
        self.payload = None;
        self.env_version = None;
        self.pid = None;
        self.hostname = None;
        self.fields.clear();
    }
}

impl Field {
    /// String-valued field
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            value_type: Some(ValueType::String as i32),
            value_string: vec![value.into()],
            ..Default::default()
        }
    }

    /// Bytes-valued field
    pub fn bytes(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Field {
            name: name.into(),
            value_type: Some(ValueType::Bytes as i32),
            value_bytes: vec![value.into()],
            ..Default::default()
        }
    }

    /// Integer-valued field
    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Field {
            name: name.into(),
            value_type: Some(ValueType::Integer as i32),
            value_integer: vec![value],
            ..Default::default()
        }
    }

    /// Double-valued field
    pub fn double(name: impl Into<String>, value: f64) -> Self {
        Field {
            name: name.into(),
            value_type: Some(ValueType::Double as i32),
            value_double: vec![value],
            ..Default::default()
        }
    }

    /// Bool-valued field
    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Field {
            name: name.into(),
            value_type: Some(ValueType::Bool as i32),
            value_bool: vec![value],
            ..Default::default()
        }
    }

    /// Attach a representation hint, e.g. "file-extension" or "ns"
    pub fn with_representation(mut self, repr: impl Into<String>) -> Self {
        self.representation = Some(repr.into());
        self
    }

    /// Value kind, defaulting to `String` when unset
    pub fn kind(&self) -> ValueType {
        self.value_type
            .and_then(|v| ValueType::try_from(v).ok())
            .unwrap_or(ValueType::String)
    }

    /// Number of values this field holds
    pub fn len(&self) -> usize {
        match self.kind() {
            ValueType::String => self.value_string.len(),
            ValueType::Bytes => self.value_bytes.len(),
            ValueType::Integer => self.value_integer.len(),
            ValueType::Double => self.value_double.len(),
            ValueType::Bool => self.value_bool.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrowed view of the value at `index`
    pub fn value(&self, index: usize) -> Option<FieldValue<'_>> {
        match self.kind() {
            ValueType::String => self.value_string.get(index).map(|s| FieldValue::String(s)),
            ValueType::Bytes => self.value_bytes.get(index).map(|b| FieldValue::Bytes(b)),
            ValueType::Integer => self.value_integer.get(index).copied().map(FieldValue::Integer),
            ValueType::Double => self.value_double.get(index).copied().map(FieldValue::Double),
            ValueType::Bool => self.value_bool.get(index).copied().map(FieldValue::Bool),
        }
    }
}

/// Current wall clock as nanoseconds since the Unix epoch
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn serialize_uuid<S: serde::Serializer>(uuid: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    match Uuid::from_slice(uuid) {
        Ok(u) => s.serialize_str(&u.hyphenated().to_string()),
        Err(_) => s.serialize_str(""),
    }
}
