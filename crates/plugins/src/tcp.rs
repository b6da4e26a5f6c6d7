//! TCP stream input
//!
//! Listens for framed message streams. Each connection gets its own task
//! scanning frames out of the byte stream. Frame payloads travel to the
//! configured decoder as raw pack bytes, or are decoded inline when no
//! decoder is wired.

use std::time::Duration;

use async_trait::async_trait;
use prost::Message as ProstMessage;
use strom_pipeline::{Input, InputRunner, Plugin, PluginError, PluginHelper, PluginInstanceConfig};
use strom_protocol::{FrameDecoder, Message};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Default per-read deadline on idle connections
const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Framed TCP listener input
pub struct TcpInput {
    address: String,
    read_timeout: Duration,
    max_msg_size: usize,
}

impl TcpInput {
    pub fn new() -> Self {
        Self {
            address: String::new(),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            max_msg_size: strom_protocol::MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for TcpInput {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for TcpInput {
    fn init(&mut self, config: &PluginInstanceConfig) -> Result<(), PluginError> {
        self.address = config
            .get_str("address")
            .ok_or_else(|| PluginError::msg("TcpInput requires 'address'"))?
            .to_string();
        if let Some(secs) = config.get_int("read_timeout") {
            self.read_timeout = Duration::from_secs(secs.max(1) as u64);
        }
        if let Some(size) = config.get_int("max_msg_size") {
            self.max_msg_size = size.max(1) as usize;
        }
        Ok(())
    }

    fn restartable(&self) -> bool {
        true
    }
}

#[async_trait]
impl Input for TcpInput {
    async fn run(&mut self, runner: &InputRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        let listener = TcpListener::bind(&self.address).await?;
        info!(input = %runner.name(), address = %self.address, "listening");

        let token = runner.shutdown();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(input = %runner.name(), %peer, "connection accepted");
                    let conn = Connection {
                        read_timeout: self.read_timeout,
                        max_msg_size: self.max_msg_size,
                    };
                    let runner = runner.clone();
                    tokio::spawn(async move { conn.serve(stream, runner).await });
                }
                _ = token.cancelled() => return Ok(()),
            }
        }
    }
}

struct Connection {
    read_timeout: Duration,
    max_msg_size: usize,
}

impl Connection {
    async fn serve(self, mut stream: TcpStream, runner: InputRunner) {
        let mut decoder = FrameDecoder::with_max_size(self.max_msg_size);
        let mut buf = vec![0u8; 8 * 1024];
        let token = runner.shutdown();

        loop {
            let read = tokio::select! {
                r = tokio::time::timeout(self.read_timeout, stream.read(&mut buf)) => r,
                _ = token.cancelled() => return,
            };
            let n = match read {
                Ok(Ok(0)) => return, // peer closed
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(input = %runner.name(), error = %e, "read failed");
                    return;
                }
                Err(_) => {
                    debug!(input = %runner.name(), "connection idle past deadline");
                    return;
                }
            };

            decoder.extend(&buf[..n]);
            loop {
                match decoder.decode_payload() {
                    Ok(Some(payload)) => {
                        let Some(pack) = runner.new_pack().await else {
                            return;
                        };
                        if runner.has_decoder() {
                            // The wired decoder owns interpretation of the
                            // raw frame payload.
                            pack.set_raw(payload);
                        } else {
                            match Message::decode(payload.as_slice()) {
                                Ok(msg) => pack.set_message(msg),
                                Err(e) => {
                                    warn!(input = %runner.name(), error = %e, "corrupt message skipped");
                                    runner.recycle(pack);
                                    continue;
                                }
                            }
                        }
                        runner.inject(pack).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Skip the corrupt frame; the decoder resynced.
                        warn!(input = %runner.name(), error = %e, "corrupt frame skipped");
                    }
                }
            }
        }
    }
}
