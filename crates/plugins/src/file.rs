//! File output
//!
//! Appends matched messages to a file in one of three formats, buffering
//! writes and flushing on a timer and at shutdown. Restartable: a fresh
//! instance reopens the file after a fault.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use strom_pipeline::{FoRunner, Output, Pack, Plugin, PluginError, PluginHelper, PluginInstanceConfig};
use strom_protocol::encode_frame;
use tracing::debug;

/// Serialization format for `FileOutput`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Payload only, one line per message
    Text,
    /// Whole message as one JSON object per line
    Json,
    /// Length-delimited binary frames, replayable by `TcpInput` peers
    Protostream,
}

impl FileFormat {
    fn parse(s: &str) -> Result<Self, PluginError> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "protostream" => Ok(Self::Protostream),
            other => Err(PluginError::msg(format!("unsupported format: {other}"))),
        }
    }
}

/// Timestamp prefix layout, matching common access-log conventions
const TS_FORMAT: &str = "[%Y/%b/%d:%H:%M:%S %z] ";

/// Default flush interval in milliseconds
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Batched file writer output
pub struct FileOutput {
    path: PathBuf,
    format: FileFormat,
    prefix_ts: bool,
    flush_interval: Duration,
    file: Option<File>,
    batch: Vec<u8>,
}

impl FileOutput {
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            format: FileFormat::Text,
            prefix_ts: false,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            file: None,
            batch: Vec::with_capacity(16 * 1024),
        }
    }

    fn open_file(&mut self) -> Result<(), PluginError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    /// Serialize one message onto the batch buffer
    fn append(&mut self, pack: &Pack) -> Result<(), PluginError> {
        let msg = pack.message();
        if self.prefix_ts && self.format != FileFormat::Protostream {
            let ts = chrono::Local::now().format(TS_FORMAT).to_string();
            self.batch.extend_from_slice(ts.as_bytes());
        }
        match self.format {
            FileFormat::Text => {
                self.batch.extend_from_slice(msg.payload().as_bytes());
                self.batch.push(b'\n');
            }
            FileFormat::Json => {
                serde_json::to_writer(&mut self.batch, &*msg)
                    .map_err(|e| PluginError::msg(format!("can't encode to JSON: {e}")))?;
                self.batch.push(b'\n');
            }
            FileFormat::Protostream => {
                let mut buf = strom_protocol::BytesMut::new();
                encode_frame(&msg, &mut buf)?;
                self.batch.extend_from_slice(&buf);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| PluginError::msg("output file is not open"))?;
        file.write_all(&self.batch)?;
        file.flush()?;
        debug!(bytes = self.batch.len(), path = %self.path.display(), "flushed");
        self.batch.clear();
        Ok(())
    }
}

impl Default for FileOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for FileOutput {
    fn init(&mut self, config: &PluginInstanceConfig) -> Result<(), PluginError> {
        self.path = config
            .get_path("path")
            .ok_or_else(|| PluginError::msg("FileOutput requires 'path'"))?;
        if let Some(fmt) = config.get_str("format") {
            self.format = FileFormat::parse(fmt)?;
        }
        self.prefix_ts = config.get_bool("prefix_ts").unwrap_or(false);
        if let Some(ms) = config.get_int("flush_interval") {
            self.flush_interval = Duration::from_millis(ms.max(1) as u64);
        }
        self.open_file()
            .map_err(|e| PluginError::msg(format!("error opening {}: {e}", self.path.display())))
    }

    fn restartable(&self) -> bool {
        true
    }

    fn cleanup_for_restart(&mut self) {
        // Drop the handle; the replacement instance reopens at init.
        self.batch.clear();
        self.file = None;
    }
}

#[async_trait]
impl Output for FileOutput {
    async fn run(&mut self, runner: &FoRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        let mut flush_tick = tokio::time::interval(self.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = runner.next_pack() => match maybe {
                    Some(pack) => {
                        let result = self.append(&pack);
                        runner.recycle(pack);
                        result?;
                    }
                    None => {
                        // Queue closed: flush what's buffered and exit.
                        self.flush()?;
                        return Ok(());
                    }
                },
                _ = flush_tick.tick() => self.flush()?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strom_protocol::{FrameDecoder, Message};

    fn output_with(format: &str, path: &std::path::Path) -> FileOutput {
        let config = PluginInstanceConfig::of_type("FileOutput")
            .with_option("path", path.to_string_lossy().into_owned())
            .with_option("format", format);
        let mut output = FileOutput::new();
        output.init(&config).expect("init");
        output
    }

    async fn pack_with_payload(pool: &strom_pipeline::PackPool, payload: &str) -> Pack {
        let pack = pool.acquire().await;
        {
            let mut msg = pack.message_mut();
            *msg = Message::new("file.test");
            msg.set_payload(payload);
        }
        pack
    }

    #[tokio::test]
    async fn test_text_format_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut output = output_with("text", &path);
        let pool = strom_pipeline::PackPool::new(4);

        for payload in ["first", "second"] {
            let pack = pack_with_payload(&pool, payload).await;
            output.append(&pack).unwrap();
            pool.recycle(pack);
        }
        output.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_json_format_is_parseable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut output = output_with("json", &path);
        let pool = strom_pipeline::PackPool::new(4);

        let pack = pack_with_payload(&pool, "json body").await;
        output.append(&pack).unwrap();
        pool.recycle(pack);
        output.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(value["payload"], "json body");
        assert_eq!(value["type"], "file.test");
    }

    #[tokio::test]
    async fn test_protostream_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pb");
        let mut output = output_with("protostream", &path);
        let pool = strom_pipeline::PackPool::new(4);

        let pack = pack_with_payload(&pool, "framed").await;
        let original = pack.message().clone();
        output.append(&pack).unwrap();
        pool.recycle(pack);
        output.flush().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        let decoded = decoder.decode().unwrap().expect("one frame");
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_flush_on_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let mut output = output_with("text", &path);
        output.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let config = PluginInstanceConfig::of_type("FileOutput")
            .with_option("path", "/tmp/x")
            .with_option("format", "xml");
        let mut output = FileOutput::new();
        assert!(output.init(&config).is_err());
    }

    #[test]
    fn test_missing_path_rejected() {
        let mut output = FileOutput::new();
        assert!(output.init(&PluginInstanceConfig::of_type("FileOutput")).is_err());
    }
}
