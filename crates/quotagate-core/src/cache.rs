//! Durable TTL cache: one JSON file per key, atomic replace on write.
//!
//! The cache never blocks a fetch: read failures of any kind are logged and
//! treated as a miss, and write failures are logged and swallowed, since the
//! freshly fetched payload is still returned to the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Default freshness window: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// One persisted cache record.
///
/// Freshness is computed at read time from `stored_at`; entries are never
/// explicitly deleted, only treated as absent once stale and overwritten by
/// the next successful fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

/// File-backed cache with per-read TTL.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    default_ttl: Duration,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>, default_ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            default_ttl,
        }
    }

    /// Cache rooted at `dir` with the 24-hour default TTL.
    pub fn with_default_ttl(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_TTL)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the payload for `key` if an entry exists and is younger than
    /// the TTL. Callers cannot distinguish "never stored" from "expired".
    pub async fn get(&self, key: &str, ttl_override: Option<Duration>) -> Option<Value> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(key, path = %path.display(), %error, "cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(key, path = %path.display(), %error, "cache entry unreadable, treating as miss");
                return None;
            }
        };

        let ttl = ttl_override.unwrap_or(self.default_ttl);
        let age = OffsetDateTime::now_utc() - entry.stored_at;
        if age.as_seconds_f64() > ttl.as_secs_f64() {
            debug!(key, age_secs = age.whole_seconds(), "cache entry expired");
            return None;
        }

        Some(entry.payload)
    }

    /// Persist `payload` under `key`, overwriting any previous entry.
    ///
    /// The entry is written to a unique temporary file in the cache directory
    /// and renamed into place, so readers never observe a partial write.
    /// Concurrent writers for the same key: last rename wins.
    pub async fn put(&self, key: &str, payload: &Value) {
        if let Err(error) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(key, dir = %self.dir.display(), %error, "cache dir unavailable, skipping write");
            return;
        }

        let entry = CacheEntry {
            key: key.to_owned(),
            payload: payload.clone(),
            stored_at: OffsetDateTime::now_utc(),
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(key, %error, "cache entry serialization failed, skipping write");
                return;
            }
        };

        let path = self.entry_path(key);
        let tmp = self.dir.join(format!(
            "{}.{}.tmp",
            sanitize_key(key),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));

        if let Err(error) = tokio::fs::write(&tmp, &bytes).await {
            warn!(key, path = %tmp.display(), %error, "cache write failed, payload not cached");
            return;
        }
        if let Err(error) = tokio::fs::rename(&tmp, &path).await {
            warn!(key, path = %path.display(), %error, "cache replace failed, payload not cached");
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Normalize a fetch key into a safe file stem: lowercase, with anything
/// outside `[a-z0-9._-]` replaced by `_`.
fn sanitize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|ch| {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
