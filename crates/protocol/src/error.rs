//! Protocol error types

use thiserror::Error;

/// Errors arising from message encoding, decoding, and framing
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded message exceeds the wire size limit
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Frame header failed to decode
    #[error("corrupt frame header: {0}")]
    CorruptHeader(#[source] prost::DecodeError),

    /// Frame header did not advertise a message length
    #[error("frame header missing message length")]
    MissingLength,

    /// Advertised message length exceeds the configured maximum
    #[error("framed message too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Expected unit separator byte was absent
    #[error("malformed frame: missing unit separator")]
    MissingUnitSeparator,

    /// Message payload failed to decode
    #[error("corrupt message: {0}")]
    CorruptMessage(#[source] prost::DecodeError),

    /// UUID bytes were not exactly 16 bytes long
    #[error("invalid uuid length: {0} bytes")]
    InvalidUuid(usize),
}
