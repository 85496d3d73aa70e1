//! Behavior-driven tests for cache-first fetching with ordered fallback.
//!
//! These tests verify HOW a fetch walks its source chain: cache hits
//! short-circuit, sources are tried in caller order, the first success is
//! cached, and chain exhaustion aggregates every cause in order.

use quotagate_tests::{
    AdmissionController, AttemptCause, DiskCache, FallbackFetcher, FetchError, FetchRequest,
    PayloadSource, QuotaTracker, RetryPolicy, ScriptedSource, ServiceQuota,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn fetcher(dir: &Path, limits: HashMap<String, ServiceQuota>) -> FallbackFetcher {
    let tracker = Arc::new(QuotaTracker::new(limits));
    FallbackFetcher::new(
        AdmissionController::new(tracker),
        DiskCache::with_default_ttl(dir),
    )
    .with_retry(RetryPolicy::new(1, Duration::from_millis(1)))
}

fn open_limits(services: &[&str]) -> HashMap<String, ServiceQuota> {
    services
        .iter()
        .map(|service| ((*service).to_owned(), ServiceQuota::per_minute(100)))
        .collect()
}

// =============================================================================
// Fallback Ordering
// =============================================================================

#[tokio::test]
async fn when_the_primary_fails_the_fallback_result_is_returned_and_cached() {
    // Given: A failing primary and a succeeding secondary
    let dir = tempdir().expect("tempdir");
    let fetcher = fetcher(dir.path(), open_limits(&["primary", "secondary"]));
    let primary = ScriptedSource::failing("primary");
    let secondary = ScriptedSource::succeeding("secondary", json!({"price": 187.2}));
    let sources: Vec<Arc<dyn PayloadSource>> = vec![primary.clone(), secondary.clone()];

    // When: The key is fetched twice within the ttl
    let req = FetchRequest::new("AAPL").expect("valid key");
    let first = fetcher.fetch(&req, &sources).await.expect("fallback succeeds");
    let second = fetcher.fetch(&req, &sources).await.expect("cache hit");

    // Then: Both fetches return the fallback payload
    assert_eq!(first, json!({"price": 187.2}));
    assert_eq!(second, first);

    // And: The second fetch touched neither source
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn when_the_primary_succeeds_later_sources_are_never_consulted() {
    let dir = tempdir().expect("tempdir");
    let fetcher = fetcher(dir.path(), open_limits(&["primary", "secondary"]));
    let primary = ScriptedSource::succeeding("primary", json!(1));
    let secondary = ScriptedSource::succeeding("secondary", json!(2));
    let sources: Vec<Arc<dyn PayloadSource>> = vec![primary.clone(), secondary.clone()];

    let req = FetchRequest::new("key").expect("valid key");
    let payload = fetcher.fetch(&req, &sources).await.expect("primary wins");

    assert_eq!(payload, json!(1));
    assert_eq!(secondary.calls(), 0, "chain must stop at the first success");
}

// =============================================================================
// Chain Exhaustion
// =============================================================================

#[tokio::test]
async fn when_every_source_fails_the_causes_arrive_in_attempt_order() {
    // Given: Two sources that always fail
    let dir = tempdir().expect("tempdir");
    let fetcher = fetcher(dir.path(), open_limits(&["primary", "secondary"]));
    let sources: Vec<Arc<dyn PayloadSource>> = vec![
        ScriptedSource::failing("primary"),
        ScriptedSource::failing("secondary"),
    ];

    // When: The fetch exhausts the chain
    let req = FetchRequest::new("key").expect("valid key");
    let error = fetcher.fetch(&req, &sources).await.expect_err("all fail");

    // Then: The aggregate error carries both causes, in provider order
    let FetchError::AllSourcesFailed { key, causes } = error else {
        panic!("expected AllSourcesFailed, got {error:?}");
    };
    assert_eq!(key, "key");
    assert_eq!(causes.len(), 2);
    assert_eq!(causes[0].service(), "primary");
    assert_eq!(causes[1].service(), "secondary");
}

#[tokio::test]
async fn when_a_source_is_rate_limited_the_cause_is_distinct_from_a_failure() {
    // Given: A primary with zero quota and a failing secondary
    let dir = tempdir().expect("tempdir");
    let mut limits = open_limits(&["secondary"]);
    limits.insert("primary".to_owned(), ServiceQuota::per_minute(0));
    let fetcher = fetcher(dir.path(), limits);

    let primary = ScriptedSource::succeeding("primary", json!("unreachable"));
    let sources: Vec<Arc<dyn PayloadSource>> =
        vec![primary.clone(), ScriptedSource::failing("secondary")];

    // When: The fetch exhausts the chain
    let req = FetchRequest::new("key").expect("valid key");
    let error = fetcher.fetch(&req, &sources).await.expect_err("all exhausted");

    // Then: The denial and the failure are tagged differently
    let FetchError::AllSourcesFailed { causes, .. } = error else {
        panic!("expected AllSourcesFailed");
    };
    assert!(matches!(
        causes[0],
        AttemptCause::RateLimitExceeded { ref service } if service == "primary"
    ));
    assert!(matches!(causes[1], AttemptCause::Source { .. }));

    // And: The rate-limited source was never invoked
    assert_eq!(primary.calls(), 0);
}

// =============================================================================
// Refresh Semantics
// =============================================================================

#[tokio::test]
async fn when_force_refresh_is_set_a_fresh_payload_replaces_the_cached_one() {
    let dir = tempdir().expect("tempdir");
    let fetcher = fetcher(dir.path(), open_limits(&["primary"]));

    let stale = ScriptedSource::succeeding("primary", json!({"rev": 1}));
    let req = FetchRequest::new("key").expect("valid key");
    fetcher
        .fetch(&req, &[stale.clone() as Arc<dyn PayloadSource>])
        .await
        .expect("first fetch");

    // When: A refresh fetch runs against a source with newer data
    let fresh = ScriptedSource::succeeding("primary", json!({"rev": 2}));
    let refresh = FetchRequest::new("key").expect("valid key").force_refresh();
    let payload = fetcher
        .fetch(&refresh, &[fresh.clone() as Arc<dyn PayloadSource>])
        .await
        .expect("refresh fetch");

    // Then: The fresh payload is returned and becomes the cached value
    assert_eq!(payload, json!({"rev": 2}));
    let followup = fetcher
        .fetch(&req, &[stale.clone() as Arc<dyn PayloadSource>])
        .await
        .expect("cache hit");
    assert_eq!(followup, json!({"rev": 2}));
    assert_eq!(stale.calls(), 1, "follow-up fetch must come from the cache");
}

#[tokio::test]
async fn when_the_ttl_elapses_the_next_fetch_goes_back_to_the_sources() {
    let dir = tempdir().expect("tempdir");
    let fetcher = fetcher(dir.path(), open_limits(&["primary"]));
    let source = ScriptedSource::succeeding("primary", json!(1));
    let sources: Vec<Arc<dyn PayloadSource>> = vec![source.clone()];

    let req = FetchRequest::new("key")
        .expect("valid key")
        .with_ttl(Duration::from_millis(30));
    fetcher.fetch(&req, &sources).await.expect("first fetch");

    tokio::time::sleep(Duration::from_millis(60)).await;
    fetcher.fetch(&req, &sources).await.expect("re-fetch");

    assert_eq!(source.calls(), 2, "expired entries must be re-fetched");
}

// =============================================================================
// Concurrent Cold-Cache Fetches (no single-flight)
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn when_two_callers_fetch_a_cold_key_both_fetch_independently() {
    let dir = tempdir().expect("tempdir");
    let fetcher = Arc::new(fetcher(dir.path(), open_limits(&["primary"])));
    let source = ScriptedSource::succeeding("primary", json!(7));
    let sources: Vec<Arc<dyn PayloadSource>> = vec![source.clone()];

    let req = FetchRequest::new("key").expect("valid key");
    let (left, right) = tokio::join!(
        {
            let fetcher = fetcher.clone();
            let req = req.clone();
            let sources = sources.clone();
            async move { fetcher.fetch(&req, &sources).await }
        },
        {
            let fetcher = fetcher.clone();
            let req = req.clone();
            let sources = sources.clone();
            async move { fetcher.fetch(&req, &sources).await }
        },
    );

    // Both callers succeed; the cache holds the payload afterwards. The
    // sources may have been invoked once or twice depending on interleaving.
    assert_eq!(left.expect("left fetch"), json!(7));
    assert_eq!(right.expect("right fetch"), json!(7));
    assert!(source.calls() >= 1 && source.calls() <= 2);
    assert_eq!(fetcher.cache().get("key", None).await, Some(json!(7)));
}
