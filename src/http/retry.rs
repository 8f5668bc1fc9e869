use crate::config::HttpConfig;
use crate::http::ProbeResult;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Retry and pacing parameters of one client instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Total attempts, at least 1
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    /// Minimum gap between outbound requests of the client
    pub rate_limit_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPlan {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

impl RetryPlan {
    /// Builds a plan, clamping negative delays to 0 and attempts to at least 1
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: u32::try_from(config.max_attempts.max(1)).unwrap_or(u32::MAX),
            initial_delay_ms: clamp_ms(config.initial_delay_ms),
            rate_limit_ms: clamp_ms(config.rate_limit_ms),
            max_delay_ms: clamp_ms(config.max_delay_ms),
        }
    }

    /// Returns the backoff after a failed `attempt` (1-based)
    ///
    /// `min(max_delay_ms, initial_delay_ms × 2^(attempt-1))`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

fn clamp_ms(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Decides whether an attempt's outcome is worth retrying
///
/// Transport errors and statuses 0, 429 and 5xx are retried.
pub fn should_retry(result: &ProbeResult) -> bool {
    match result {
        Err(_) => true,
        Ok(response) => matches!(response.status, 0 | 429) || response.status >= 500,
    }
}

/// Parses a `Retry-After` header into milliseconds
///
/// Accepts delay-seconds or an HTTP-date. Dates in the past yield 0.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let millis = (date.with_timezone(&Utc) - now).num_milliseconds();
    Some(u64::try_from(millis).unwrap_or(0))
}
