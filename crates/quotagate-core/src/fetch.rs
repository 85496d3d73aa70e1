//! Cache-first fetching through an ordered chain of fallback sources.
//!
//! `FallbackFetcher` composes the quota/admission layer with the disk cache:
//! a fetch consults the cache, then walks the caller-supplied source chain in
//! order, admitting each attempt through the [`AdmissionController`]. The
//! first success is cached and returned; if every source is denied or fails,
//! the ordered causes are aggregated into one terminal error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::cache::DiskCache;
use crate::error::{AttemptCause, FetchError, SourceError};
use crate::policy::RetryPolicy;

/// Boxed future returned by [`PayloadSource::fetch`].
pub type PayloadFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, SourceError>> + Send + 'a>>;

/// One upstream data source in a fallback chain.
///
/// The core treats the call as opaque: any failure means "this source did not
/// produce data" and moves the chain along. Implementations must be
/// `Send + Sync` since a fetcher is shared across concurrent tasks.
pub trait PayloadSource: Send + Sync {
    /// Name of the rate-limited service this source consumes quota from.
    fn service(&self) -> &str;

    /// Token cost charged against the service's token window, if it has one.
    fn token_cost(&self) -> u64 {
        0
    }

    fn fetch<'a>(&'a self, key: &'a str) -> PayloadFuture<'a>;
}

/// A single fetch: cache key plus per-call freshness and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    key: String,
    force_refresh: bool,
    ttl: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl FetchRequest {
    pub fn new(key: impl Into<String>) -> Result<Self, FetchError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(FetchError::EmptyKey);
        }
        Ok(Self {
            key,
            force_refresh: false,
            ttl: None,
            retry: None,
        })
    }

    /// Skip the cache lookup and fetch fresh data. The result is still
    /// written back to the cache.
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Cache-first fetcher over an ordered source chain.
///
/// Owns no durable state of its own; it composes a shared tracker (via the
/// admission controller) and the disk cache, both constructed once at process
/// start.
pub struct FallbackFetcher {
    admission: AdmissionController,
    cache: DiskCache,
    retry: RetryPolicy,
}

impl FallbackFetcher {
    pub fn new(admission: AdmissionController, cache: DiskCache) -> Self {
        Self {
            admission,
            cache,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy applied when a request does not carry one.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Fetch the payload for `req.key()`, consulting the cache first and
    /// then walking `sources` strictly in the supplied order.
    ///
    /// A denied admission counts as an attempt with cause
    /// [`AttemptCause::RateLimitExceeded`]; a failed call counts with cause
    /// [`AttemptCause::Source`]. Concurrent cold-cache fetches for the same
    /// key are not deduplicated: each caller fetches independently and the
    /// last cache write wins.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Quota`] if a source names an unconfigured service.
    /// - [`FetchError::NoSources`] if `sources` is empty.
    /// - [`FetchError::AllSourcesFailed`] once every source is exhausted,
    ///   carrying the causes in attempt order.
    pub async fn fetch(
        &self,
        req: &FetchRequest,
        sources: &[Arc<dyn PayloadSource>],
    ) -> Result<Value, FetchError> {
        if !req.force_refresh {
            if let Some(payload) = self.cache.get(&req.key, req.ttl).await {
                debug!(key = %req.key, "cache hit");
                return Ok(payload);
            }
        }

        if sources.is_empty() {
            return Err(FetchError::NoSources {
                key: req.key.clone(),
            });
        }

        let retry = req.retry.unwrap_or(self.retry);
        let mut causes = Vec::with_capacity(sources.len());

        for source in sources {
            let service = source.service();

            if !self
                .admission
                .acquire(service, source.token_cost(), &retry)
                .await?
            {
                warn!(key = %req.key, service, "admission denied, trying next source");
                causes.push(AttemptCause::RateLimitExceeded {
                    service: service.to_owned(),
                });
                continue;
            }

            match source.fetch(&req.key).await {
                Ok(payload) => {
                    info!(key = %req.key, service, "fetched fresh payload");
                    self.cache.put(&req.key, &payload).await;
                    return Ok(payload);
                }
                Err(error) => {
                    warn!(key = %req.key, service, %error, "source failed, trying next source");
                    causes.push(AttemptCause::Source {
                        service: service.to_owned(),
                        error,
                    });
                }
            }
        }

        Err(FetchError::AllSourcesFailed {
            key: req.key.clone(),
            causes,
        })
    }
}
