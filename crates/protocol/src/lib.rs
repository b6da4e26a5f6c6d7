//! Strom Protocol - Message data model and wire format
//!
//! This crate provides the record type that flows through the pipeline and
//! its length-delimited binary encoding:
//! - `Message` - structured log/event record (protobuf schema via prost)
//! - `Field` - typed named value attached to a message
//! - `encode_frame` / `FrameDecoder` - stream framing for wire transport
//!
//! # Wire Format
//!
//! Each record on the wire is framed as:
//!
//! ```text
//! 0x1E | header len (1 byte) | FrameHeader (protobuf) | 0x1F | Message (protobuf)
//! ```
//!
//! The `FrameHeader` carries the exact message length (and reserves room for
//! HMAC metadata). A `FrameDecoder` scans a byte stream incrementally,
//! resynchronizing on the next record separator after a corrupt frame.
//!
//! # Round-trip guarantee
//!
//! Encoding a `Message` and decoding the result yields an identical message,
//! including field order. Tests in `message_test.rs` pin this down.

mod error;
mod frame;
mod message;

pub use error::ProtocolError;
pub use frame::{FrameDecoder, FrameHeader, encode_frame, encode_message};
pub use message::{Field, FieldValue, Message, ValueType, now_nanos};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Marks the start of a frame in a byte stream
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Separates the frame header from the message payload
pub const UNIT_SEPARATOR: u8 = 0x1F;

/// Largest encoded message accepted on the wire (64KiB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Largest frame header accepted; the length prefix is a single byte
pub const MAX_HEADER_SIZE: usize = 255;

/// Length of a message UUID in bytes
pub const UUID_SIZE: usize = 16;
