//! Counter filter
//!
//! Counts matched messages and injects a rate summary back into the
//! pipeline on every ticker interval. Mostly useful for smoke-testing a
//! config and for watching throughput without external tooling.

use std::time::Instant;

use async_trait::async_trait;
use strom_pipeline::{FoRunner, Filter, Plugin, PluginError, PluginHelper, PluginInstanceConfig};
use strom_protocol::Message;
use tokio::time::Interval;
use tracing::warn;

/// Message type stamped on summaries, excluded by typical counter matchers
pub const COUNTER_OUTPUT_TYPE: &str = "strom.counter-output";

/// Rate-summary filter
pub struct CounterFilter {
    seen: u64,
    last_report: Option<Instant>,
}

impl CounterFilter {
    pub fn new() -> Self {
        Self {
            seen: 0,
            last_report: None,
        }
    }

    /// Build one summary message from the current window
    fn summary(&mut self, helper: &PluginHelper) -> Message {
        let now = Instant::now();
        let elapsed = self
            .last_report
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        let rate = if elapsed > 0.0 {
            self.seen as f64 / elapsed
        } else {
            0.0
        };

        let mut msg = Message::new(COUNTER_OUTPUT_TYPE);
        msg.set_hostname(helper.hostname());
        msg.set_pid(helper.pid());
        msg.set_payload(format!(
            "Got {} messages. {:.2} msg/sec",
            self.seen, rate
        ));

        self.seen = 0;
        self.last_report = Some(now);
        msg
    }
}

impl Default for CounterFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for CounterFilter {
    fn init(&mut self, _config: &PluginInstanceConfig) -> Result<(), PluginError> {
        Ok(())
    }

    fn restartable(&self) -> bool {
        true
    }

    fn cleanup_for_restart(&mut self) {
        self.seen = 0;
        self.last_report = None;
    }
}

/// Await the next tick of an optional ticker, or never
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Filter for CounterFilter {
    async fn run(&mut self, runner: &FoRunner, helper: &PluginHelper) -> Result<(), PluginError> {
        let mut ticker = runner.ticker();
        if ticker.is_none() {
            warn!(filter = %runner.name(), "no ticker_interval; counts will never report");
        }
        self.last_report = Some(Instant::now());

        loop {
            tokio::select! {
                maybe = runner.next_pack() => match maybe {
                    Some(pack) => {
                        self.seen += 1;
                        runner.recycle(pack);
                    }
                    None => return Ok(()),
                },
                _ = next_tick(&mut ticker) => {
                    let mut msg = self.summary(helper);
                    msg.set_logger(runner.name());
                    let pack = helper.pool().acquire().await;
                    pack.set_message(msg);
                    runner.inject(pack);
                }
            }
        }
    }
}
