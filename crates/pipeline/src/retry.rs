//! Bounded exponential backoff shared by all restart supervisors

use std::time::Duration;

use rand::Rng;
use strom_config::RetryOptions;

use crate::PipelineError;

/// Backoff state for one supervised plugin
///
/// Each `wait` sleeps for the current delay plus a random jitter, then
/// doubles the delay up to `max_delay`. `reset` restores the initial state
/// after a successful recovery. Exhausting `max_retries` yields an error;
/// a negative `max_retries` never exhausts.
pub struct RetryHelper {
    opts: RetryOptions,
    current: Duration,
    retries: u32,
}

impl RetryHelper {
    pub fn new(opts: RetryOptions) -> Self {
        let current = opts.delay;
        Self {
            opts,
            current,
            retries: 0,
        }
    }

    /// Sleep out the next backoff slot
    pub async fn wait(&mut self) -> Result<(), PipelineError> {
        if self.opts.max_retries >= 0 && self.retries > self.opts.max_retries as u32 {
            return Err(PipelineError::RetryExhausted {
                attempts: self.retries,
            });
        }

        tokio::time::sleep(self.current + self.jitter()).await;

        self.retries += 1;
        self.current = (self.current * 2).min(self.opts.max_delay);
        Ok(())
    }

    /// Uniform random perturbation in [0, max_jitter]
    fn jitter(&self) -> Duration {
        let max = self.opts.max_jitter.as_nanos() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..=max))
    }

    /// Forget accumulated backoff after a successful recovery
    pub fn reset(&mut self) {
        self.retries = 0;
        self.current = self.opts.delay;
    }

    /// Backoff slots consumed since the last reset
    pub fn attempts(&self) -> u32 {
        self.retries
    }
}
