//! Retry delay policy.
//!
//! Pure decision logic, kept apart from the HTTP loop:
//! - computed backoff doubles per attempt, capped at `max_delay`
//! - a server `Retry-After` hint replaces the computed value, capped at `max_retry_after`

use crate::models::RetryConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retry_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint {
            return hint.min(self.max_retry_after);
        }

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether another attempt is allowed after failed attempt `attempt` (0-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Parse a `Retry-After` header value (delta-seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

pub(crate) fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        // Values past `Duration::MAX` saturate; `next_delay` caps them anyway
        return Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
