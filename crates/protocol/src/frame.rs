//! Stream framing for wire transport
//!
//! A frame is `0x1E | header len | FrameHeader | 0x1F | message bytes`. The
//! header advertises the exact encoded message length so a reader never has
//! to guess at boundaries; HMAC metadata slots are reserved but unused.
//!
//! `FrameDecoder` consumes a byte stream incrementally. A corrupt frame is
//! reported once and the scan resumes at the next record separator, so one
//! bad writer cannot poison a connection.

use bytes::{Buf, BufMut, BytesMut};
use prost::Message as ProstMessage;

use crate::{
    MAX_HEADER_SIZE, MAX_MESSAGE_SIZE, Message, ProtocolError, RECORD_SEPARATOR, Result,
    UNIT_SEPARATOR,
};

/// Frame header advertising the payload length
///
/// Tags 3..5 are reserved for HMAC metadata (signer, key version, digest) so
/// signed streams stay wire-compatible.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FrameHeader {
    #[prost(uint32, optional, tag = "1")]
    pub message_length: Option<u32>,

    #[prost(string, optional, tag = "3")]
    pub hmac_signer: Option<String>,

    #[prost(uint32, optional, tag = "4")]
    pub hmac_key_version: Option<u32>,

    #[prost(bytes = "vec", optional, tag = "5")]
    pub hmac: Option<Vec<u8>>,
}

/// Encode a message into `buf` with full framing
pub fn encode_frame(msg: &Message, buf: &mut BytesMut) -> Result<()> {
    let msg_len = msg.encoded_len();
    if msg_len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: msg_len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let header = FrameHeader {
        message_length: Some(msg_len as u32),
        ..Default::default()
    };
    let header_len = header.encoded_len();
    debug_assert!(header_len <= MAX_HEADER_SIZE);

    buf.reserve(3 + header_len + msg_len);
    buf.put_u8(RECORD_SEPARATOR);
    buf.put_u8(header_len as u8);
    header
        .encode(buf)
        .map_err(|_| ProtocolError::MessageTooLarge { size: msg_len, max: MAX_MESSAGE_SIZE })?;
    buf.put_u8(UNIT_SEPARATOR);
    msg.encode(buf)
        .map_err(|_| ProtocolError::MessageTooLarge { size: msg_len, max: MAX_MESSAGE_SIZE })?;
    Ok(())
}

/// Encode a message with framing into a fresh buffer
pub fn encode_message(msg: &Message) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(msg.encoded_len() + 16);
    encode_frame(msg, &mut buf)?;
    Ok(buf)
}

/// Incremental frame reader
///
/// Feed raw bytes with [`FrameDecoder::extend`], then drain messages with
/// [`FrameDecoder::decode`] until it yields `Ok(None)` (needs more input).
/// A decode error consumes the offending frame; calling `decode` again
/// continues from the next record separator.
pub struct FrameDecoder {
    buf: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_size(MAX_MESSAGE_SIZE)
    }

    /// Reader with a custom message size cap (config `max_msg_size`)
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_message_size,
        }
    }

    /// Append raw stream bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently buffered and not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete message
    ///
    /// Returns `Ok(None)` when more input is needed. On `Err` the bad frame
    /// has been discarded and the decoder has resynchronized.
    pub fn decode(&mut self) -> Result<Option<Message>> {
        match self.decode_payload()? {
            Some(payload) => match Message::decode(payload.as_slice()) {
                Ok(msg) => Ok(Some(msg)),
                Err(e) => Err(ProtocolError::CorruptMessage(e)),
            },
            None => Ok(None),
        }
    }

    /// Try to extract the next frame's payload without decoding it
    ///
    /// Used by inputs that hand raw bytes to a downstream decoder plugin.
    pub fn decode_payload(&mut self) -> Result<Option<Vec<u8>>> {
        // Discard garbage before the next record separator.
        match self.buf.iter().position(|&b| b == RECORD_SEPARATOR) {
            Some(0) => {}
            Some(n) => self.buf.advance(n),
            None => {
                self.buf.clear();
                return Ok(None);
            }
        }

        // sep + header len byte
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let header_len = self.buf[1] as usize;

        // sep + len byte + header + unit sep
        let header_end = 2 + header_len;
        if self.buf.len() < header_end + 1 {
            return Ok(None);
        }

        let header = match FrameHeader::decode(&self.buf[2..header_end]) {
            Ok(h) => h,
            Err(e) => {
                self.resync();
                return Err(ProtocolError::CorruptHeader(e));
            }
        };

        if self.buf[header_end] != UNIT_SEPARATOR {
            self.resync();
            return Err(ProtocolError::MissingUnitSeparator);
        }

        let msg_len = match header.message_length {
            Some(n) => n as usize,
            None => {
                self.resync();
                return Err(ProtocolError::MissingLength);
            }
        };
        if msg_len > self.max_message_size {
            self.resync();
            return Err(ProtocolError::FrameTooLarge {
                size: msg_len,
                max: self.max_message_size,
            });
        }

        let frame_end = header_end + 1 + msg_len;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let msg_start = header_end + 1;
        let payload = self.buf[msg_start..frame_end].to_vec();
        self.buf.advance(frame_end);
        Ok(Some(payload))
    }

    /// Skip past the current record separator so the scan can continue
    fn resync(&mut self) {
        self.buf.advance(1);
        if let Some(n) = self.buf.iter().position(|&b| b == RECORD_SEPARATOR) {
            self.buf.advance(n);
        } else {
            self.buf.clear();
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
