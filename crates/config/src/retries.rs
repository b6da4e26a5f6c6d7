//! Supervised-restart retry settings

use std::time::Duration;

use serde::Deserialize;

/// Backoff settings for a plugin's restart supervisor
///
/// Durations are humantime strings ("1us", "500ms", "30s"). `max_retries`
/// of -1 retries forever.
///
/// ```toml
/// [my_output.retries]
/// max_delay = "30s"
/// delay = "250ms"
/// max_jitter = "500ms"
/// max_retries = 4
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Ceiling for the doubling delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Initial delay between attempts
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Upper bound of the random perturbation added to each sleep
    #[serde(with = "humantime_serde")]
    pub max_jitter: Duration,

    /// Attempts before the supervisor gives up; -1 means never
    pub max_retries: i32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(30),
            delay: Duration::from_millis(250),
            max_jitter: Duration::from_millis(500),
            max_retries: -1,
        }
    }
}

impl RetryOptions {
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.delay.is_zero() && self.max_delay.is_zero() && self.max_retries != 0 {
            // Zero delays are legal (tests use "1us"), a fully zero schedule
            // with unbounded retries would spin.
            if self.max_retries < 0 {
                return Err("retries with zero delay must set max_retries".into());
            }
        }
        if self.delay > self.max_delay {
            return Err(format!(
                "retries.delay ({:?}) exceeds retries.max_delay ({:?})",
                self.delay, self.max_delay
            ));
        }
        Ok(())
    }
}
