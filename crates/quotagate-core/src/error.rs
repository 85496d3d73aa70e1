use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Configuration errors raised by the quota tracker.
///
/// These indicate a programming or configuration mistake, not a transient
/// condition, and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("no quota configured for service '{service}'")]
    UnknownService { service: String },
}

/// Opaque failure reported by a payload source.
///
/// The core does not know the source's wire protocol; it only records the
/// message for diagnostics and whether the failure looked transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SourceError {}

/// Outcome of one source attempt within a fallback chain.
///
/// A denied admission is distinct from a source-level failure; both are
/// collected in order and surfaced only if the whole chain fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttemptCause {
    #[error("rate limit exhausted for service '{service}'")]
    RateLimitExceeded { service: String },

    #[error("source for service '{service}' failed: {error}")]
    Source { service: String, error: SourceError },
}

impl AttemptCause {
    pub fn service(&self) -> &str {
        match self {
            Self::RateLimitExceeded { service } | Self::Source { service, .. } => service,
        }
    }
}

/// Terminal error type for `FallbackFetcher::fetch`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error("no payload sources supplied for key '{key}'")]
    NoSources { key: String },

    #[error("all sources failed for key '{key}': {}", format_causes(.causes))]
    AllSourcesFailed { key: String, causes: Vec<AttemptCause> },

    #[error("fetch key cannot be empty")]
    EmptyKey,
}

fn format_causes(causes: &[AttemptCause]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
