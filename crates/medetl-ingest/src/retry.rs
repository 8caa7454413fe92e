//! Exponential backoff shared by page fetches and manifest publication

use std::time::Duration;

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy for upstream page fetches
    pub fn for_fetch(config: &PipelineConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            config.retry_base_delay(),
            config.retry_max_delay(),
        )
    }

    /// Policy for manifest lock contention
    pub fn for_publish(config: &PipelineConfig) -> Self {
        Self::new(
            config.publish_max_attempts,
            config.retry_base_delay(),
            config.retry_max_delay(),
        )
    }

    /// `base * 2^(attempt-1)`, capped at `max_delay`. Attempts are 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff honouring a server-provided `Retry-After`, still capped
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        match retry_after {
            Some(hint) => hint.max(backoff).min(self.max_delay),
            None => backoff,
        }
    }
}
