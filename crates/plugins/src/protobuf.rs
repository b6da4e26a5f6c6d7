//! Protobuf decoder

use prost::Message as ProstMessage;
use strom_pipeline::{Decoded, Decoder, Pack, Plugin, PluginError, PluginInstanceConfig};
use strom_protocol::Message;

/// Decodes a pack's raw wire bytes into its message
///
/// The usual partner of `TcpInput`: the input stores each frame payload in
/// the pack's raw slot and this decoder turns it into a structured record.
/// A pack with no raw bytes is assumed to be decoded already and passes
/// through untouched.
pub struct ProtobufDecoder {
    decoded: u64,
}

impl ProtobufDecoder {
    pub fn new() -> Self {
        Self { decoded: 0 }
    }

    /// Messages successfully decoded so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

impl Default for ProtobufDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for ProtobufDecoder {
    fn init(&mut self, _config: &PluginInstanceConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

impl Decoder for ProtobufDecoder {
    fn decode(&mut self, pack: Pack) -> Decoded {
        let raw = pack.take_raw();
        if raw.is_empty() {
            return Decoded::Emit(vec![pack]);
        }
        match Message::decode(raw.as_slice()) {
            Ok(msg) => {
                pack.set_message(msg);
                self.decoded += 1;
                Decoded::Emit(vec![pack])
            }
            Err(e) => Decoded::Fail(pack, PluginError::msg(format!("corrupt message: {e}"))),
        }
    }
}
