//! Admission control: bounded wait-then-retry on top of the quota tracker.

use std::sync::Arc;

use tracing::debug;

use crate::error::QuotaError;
use crate::policy::RetryPolicy;
use crate::quota::QuotaTracker;

/// Wraps a [`QuotaTracker`] query in a bounded retry loop with exponential
/// backoff.
///
/// `acquire` never fails on exhaustion: it reports `Ok(false)` and leaves the
/// decision (try the next source, or give up) to the caller. Only an unknown
/// service propagates as an error, since that is a configuration mistake
/// rather than a transient condition.
#[derive(Clone)]
pub struct AdmissionController {
    tracker: Arc<QuotaTracker>,
}

impl AdmissionController {
    pub fn new(tracker: Arc<QuotaTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &QuotaTracker {
        &self.tracker
    }

    /// Try up to `policy.max_retries` times to admit one request.
    ///
    /// Each denied attempt suspends the caller for `base_delay * 2^attempt`.
    /// The tracker's per-service lock covers only the check-and-record pair,
    /// never the sleep, so concurrent callers for other services proceed
    /// unhindered.
    pub async fn acquire(
        &self,
        service: &str,
        token_cost: u64,
        policy: &RetryPolicy,
    ) -> Result<bool, QuotaError> {
        for attempt in 0..policy.max_retries {
            if self.tracker.try_admit(service, token_cost)? {
                return Ok(true);
            }

            let delay = policy.delay_for_attempt(attempt);
            debug!(
                service,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "rate limit reached, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        Ok(false)
    }
}
