//! Strom Plugins - the built-in plugin set
//!
//! Concrete endpoints the daemon ships with:
//! - `TcpInput` - framed message stream listener
//! - `ProtobufDecoder` - raw wire bytes into decoded messages
//! - `SandboxDecoder` / `SandboxFilter` - embedded script host (re-exported
//!   from `strom-sandbox`)
//! - `CounterFilter` - message rate summaries via filter injection
//! - `FileOutput` - batched file writer with text/json/protostream formats
//! - `StdoutOutput` - debug sink
//!
//! `register_builtins` wires all of them into a plugin registry; the
//! daemon calls it once at startup.

mod counter;
mod file;
mod protobuf;
mod stdout;
mod tcp;

pub use counter::CounterFilter;
pub use file::{FileFormat, FileOutput};
pub use protobuf::ProtobufDecoder;
pub use stdout::StdoutOutput;
pub use tcp::TcpInput;

use strom_pipeline::{PluginKind, PluginRegistry};
use strom_sandbox::{SandboxDecoder, SandboxFilter};

/// Register every built-in plugin type
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register("TcpInput", || PluginKind::Input(Box::new(TcpInput::new())));
    registry.register("ProtobufDecoder", || {
        PluginKind::Decoder(Box::new(ProtobufDecoder::new()))
    });
    registry.register("SandboxDecoder", || {
        PluginKind::Decoder(Box::new(SandboxDecoder::new()))
    });
    registry.register("SandboxFilter", || {
        PluginKind::Filter(Box::new(SandboxFilter::new()))
    });
    registry.register("CounterFilter", || {
        PluginKind::Filter(Box::new(CounterFilter::new()))
    });
    registry.register("FileOutput", || {
        PluginKind::Output(Box::new(FileOutput::new()))
    });
    registry.register("StdoutOutput", || {
        PluginKind::Output(Box::new(StdoutOutput::new()))
    });
}
