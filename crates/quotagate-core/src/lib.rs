//! Core guard layer for quotagate.
//!
//! This crate contains:
//! - Per-service sliding-window quota tracking (requests, tokens, daily)
//! - Admission control with bounded retry and exponential backoff
//! - A durable TTL cache with atomic file replace
//! - Cache-first fetching through an ordered chain of fallback sources
//!
//! All shared state is constructed once at process start and passed by
//! reference to callers; quota windows reset to empty on restart.

pub mod admission;
pub mod cache;
pub mod error;
pub mod fetch;
pub mod policy;
pub mod quota;

pub use admission::AdmissionController;
pub use cache::{CacheEntry, DiskCache, DEFAULT_TTL};
pub use error::{AttemptCause, FetchError, QuotaError, SourceError};
pub use fetch::{FallbackFetcher, FetchRequest, PayloadFuture, PayloadSource};
pub use policy::{RetryPolicy, ServiceQuota};
pub use quota::QuotaTracker;
