//! Stdout debug output

use async_trait::async_trait;
use strom_pipeline::{FoRunner, Output, Plugin, PluginError, PluginHelper, PluginInstanceConfig};
use strom_protocol::Message;
use tokio::io::AsyncWriteExt;

/// Debug sink printing matched messages to stdout
///
/// With `payload_only` (the default) each message prints as its payload;
/// otherwise the whole message prints as one JSON object per line.
pub struct StdoutOutput {
    payload_only: bool,
}

impl StdoutOutput {
    pub fn new() -> Self {
        Self { payload_only: true }
    }

    /// Serialize one message into its output line
    fn render(&self, msg: &Message) -> Result<String, PluginError> {
        if self.payload_only {
            Ok(format!("{}\n", msg.payload()))
        } else {
            serde_json::to_string(msg)
                .map(|json| format!("{json}\n"))
                .map_err(|e| PluginError::msg(format!("can't encode to JSON: {e}")))
        }
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for StdoutOutput {
    fn init(&mut self, config: &PluginInstanceConfig) -> Result<(), PluginError> {
        self.payload_only = config.get_bool("payload_only").unwrap_or(true);
        Ok(())
    }
}

#[async_trait]
impl Output for StdoutOutput {
    async fn run(&mut self, runner: &FoRunner, _helper: &PluginHelper) -> Result<(), PluginError> {
        let mut stdout = tokio::io::stdout();

        while let Some(pack) = runner.next_pack().await {
            let encoded = self.render(&pack.message());
            runner.recycle(pack);
            stdout.write_all(encoded?.as_bytes()).await?;
        }
        stdout.flush().await?;
        Ok(())
    }
}
