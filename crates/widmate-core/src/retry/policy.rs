use std::time::Duration;

use super::error::FailureClass;
use crate::config::RetryConfig;

/// Capped exponential backoff for registry requests, from `[retry]` in
/// config.toml.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request, the first included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        let base = if cfg.base_delay_secs.is_finite() {
            cfg.base_delay_secs.clamp(0.0, 3600.0)
        } else {
            0.0
        };
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(base),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, or `None` to give up. `attempt`
    /// counts from 1. Throttled requests wait four times as long.
    pub fn backoff(&self, attempt: u32, class: FailureClass) -> Option<Duration> {
        if attempt >= self.max_attempts || class == FailureClass::Permanent {
            return None;
        }
        let factor = 1u32 << attempt.saturating_sub(1).min(10);
        let mut delay = self.base_delay.saturating_mul(factor);
        if class == FailureClass::Throttled {
            delay = delay.saturating_mul(4);
        }
        Some(delay.min(self.max_delay))
    }
}
