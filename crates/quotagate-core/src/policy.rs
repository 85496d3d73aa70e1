//! Static per-service quota limits and retry/backoff policy.

use std::collections::HashMap;
use std::time::Duration;

/// Quota limits for one named service. Immutable once the tracker is built.
///
/// `requests_per_minute` is always enforced; the token and daily dimensions
/// are only tracked when configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceQuota {
    pub requests_per_minute: u32,
    pub tokens_per_minute: Option<u64>,
    pub requests_per_day: Option<u32>,
}

impl ServiceQuota {
    pub const fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute: None,
            requests_per_day: None,
        }
    }

    pub const fn with_tokens_per_minute(mut self, tokens_per_minute: u64) -> Self {
        self.tokens_per_minute = Some(tokens_per_minute);
        self
    }

    pub const fn with_requests_per_day(mut self, requests_per_day: u32) -> Self {
        self.requests_per_day = Some(requests_per_day);
        self
    }

    /// Free-tier limits for the Gemini embedding endpoint.
    pub const fn gemini_embedding_default() -> Self {
        Self::per_minute(5).with_requests_per_day(100)
    }

    /// Gemini Flash completion limits.
    pub const fn gemini_flash_default() -> Self {
        Self::per_minute(15)
            .with_tokens_per_minute(1_000_000)
            .with_requests_per_day(1_500)
    }

    /// OpenRouter completion limits.
    pub const fn openrouter_default() -> Self {
        Self::per_minute(120)
    }

    /// Ready-to-use quota map for the services quotagate ships presets for.
    pub fn default_limits() -> HashMap<String, ServiceQuota> {
        HashMap::from([
            (
                "gemini_embedding".to_owned(),
                Self::gemini_embedding_default(),
            ),
            ("gemini_flash".to_owned(), Self::gemini_flash_default()),
            ("openrouter".to_owned(), Self::openrouter_default()),
        ])
    }
}

/// Bounded retry with exponential backoff, used while waiting for quota.
///
/// The delay for attempt `n` (0-based) is `base_delay * 2^n`, capped at
/// `max_delay`. Worst-case total wait is therefore deterministic:
/// `base_delay * (2^max_retries - 1)` before any cap applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scale = 2_f64.powi(attempt.min(i32::MAX as u32) as i32);
        let seconds = self.base_delay.as_secs_f64() * scale;
        let capped = seconds.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}
