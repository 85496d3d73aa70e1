//! Sliding-window quota tracking per named service.
//!
//! Each service keeps up to three independent windows: requests per minute,
//! tokens per minute, and requests per day. Every admission query prunes
//! entries older than the window before counting, so stale entries never
//! dangle across reads.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::QuotaError;
use crate::policy::ServiceQuota;

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const DAY_WINDOW: Duration = Duration::from_secs(86_400);

#[derive(Debug, Default)]
struct ServiceWindows {
    requests: VecDeque<Instant>,
    /// Token consumption as `(timestamp, token_count)` buckets rather than
    /// one entry per token, so window memory scales with request count.
    tokens: VecDeque<(Instant, u64)>,
    daily: VecDeque<Instant>,
}

impl ServiceWindows {
    fn prune(&mut self, now: Instant, minute_window: Duration, day_window: Duration) {
        prune_before(&mut self.requests, now, minute_window);
        while let Some((at, _)) = self.tokens.front() {
            if now.saturating_duration_since(*at) > minute_window {
                self.tokens.pop_front();
            } else {
                break;
            }
        }
        prune_before(&mut self.daily, now, day_window);
    }

    fn tokens_in_window(&self) -> u64 {
        self.tokens.iter().map(|(_, count)| count).sum()
    }
}

fn prune_before(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = queue.front() {
        if now.saturating_duration_since(*oldest) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

struct ServiceState {
    quota: ServiceQuota,
    windows: Mutex<ServiceWindows>,
}

/// Thread-safe per-service admission tracking.
///
/// Construct one tracker at process start and share it by reference with
/// every caller; windows start empty and are never persisted. The service map
/// is immutable after construction, so each service is guarded by its own
/// lock and unrelated services never serialize against each other.
pub struct QuotaTracker {
    services: HashMap<String, ServiceState>,
    minute_window: Duration,
    day_window: Duration,
}

impl QuotaTracker {
    pub fn new(limits: HashMap<String, ServiceQuota>) -> Self {
        Self::with_windows(limits, MINUTE_WINDOW, DAY_WINDOW)
    }

    /// Build a tracker with shrunk windows. Intended for tests that exercise
    /// window expiry without waiting out real quota periods.
    pub fn with_windows(
        limits: HashMap<String, ServiceQuota>,
        minute_window: Duration,
        day_window: Duration,
    ) -> Self {
        let services = limits
            .into_iter()
            .map(|(name, quota)| {
                (
                    name,
                    ServiceState {
                        quota,
                        windows: Mutex::new(ServiceWindows::default()),
                    },
                )
            })
            .collect();

        Self {
            services,
            minute_window,
            day_window,
        }
    }

    /// Check whether one request (with `token_cost` tokens) is currently
    /// admissible. Never records anything.
    pub fn can_admit(&self, service: &str, token_cost: u64) -> Result<bool, QuotaError> {
        let state = self.state_for(service)?;
        let mut windows = state
            .windows
            .lock()
            .expect("quota windows lock should not be poisoned");
        Ok(self.check(service, state, &mut windows, token_cost, Instant::now()))
    }

    /// Record one admission: one entry in the request window, one in the
    /// daily window when configured, and a `(now, token_cost)` bucket in the
    /// token window when configured and `token_cost > 0`.
    pub fn record_admission(&self, service: &str, token_cost: u64) -> Result<(), QuotaError> {
        let state = self.state_for(service)?;
        let mut windows = state
            .windows
            .lock()
            .expect("quota windows lock should not be poisoned");
        record(state, &mut windows, token_cost, Instant::now());
        Ok(())
    }

    /// Check and, if admissible, record — under a single lock acquisition.
    ///
    /// Two concurrent callers can never both pass a check against a limit of
    /// one: the check-then-record pair is atomic per service.
    pub fn try_admit(&self, service: &str, token_cost: u64) -> Result<bool, QuotaError> {
        let state = self.state_for(service)?;
        let mut windows = state
            .windows
            .lock()
            .expect("quota windows lock should not be poisoned");

        let now = Instant::now();
        if !self.check(service, state, &mut windows, token_cost, now) {
            return Ok(false);
        }
        record(state, &mut windows, token_cost, now);
        Ok(true)
    }

    /// Names of all configured services, unordered.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    fn state_for(&self, service: &str) -> Result<&ServiceState, QuotaError> {
        self.services
            .get(service)
            .ok_or_else(|| QuotaError::UnknownService {
                service: service.to_owned(),
            })
    }

    fn check(
        &self,
        service: &str,
        state: &ServiceState,
        windows: &mut ServiceWindows,
        token_cost: u64,
        now: Instant,
    ) -> bool {
        windows.prune(now, self.minute_window, self.day_window);

        let quota = &state.quota;
        if windows.requests.len() >= quota.requests_per_minute as usize {
            warn!(service, limit = quota.requests_per_minute, "rpm limit reached");
            return false;
        }

        if let Some(tpm) = quota.tokens_per_minute {
            if token_cost > 0 && windows.tokens_in_window() + token_cost > tpm {
                warn!(service, limit = tpm, "tpm limit reached");
                return false;
            }
        }

        if let Some(rpd) = quota.requests_per_day {
            if windows.daily.len() >= rpd as usize {
                warn!(service, limit = rpd, "rpd limit reached");
                return false;
            }
        }

        true
    }
}

fn record(state: &ServiceState, windows: &mut ServiceWindows, token_cost: u64, now: Instant) {
    windows.requests.push_back(now);
    if state.quota.tokens_per_minute.is_some() && token_cost > 0 {
        windows.tokens.push_back((now, token_cost));
    }
    if state.quota.requests_per_day.is_some() {
        windows.daily.push_back(now);
    }
}
