//! Retry and backoff decisions for failed attempts.

use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::request::{AttemptInfoError, TransportError};

use super::models::{QueueConfig, QueuedRequest};

/// Why a request was permanently discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The API rejected the request (4xx)
    ClientError { status: u16, body: Vec<u8> },
    /// Retryable failures exceeded `max_retries`
    RetriesExhausted { retry_count: u32 },
    /// Non-retryable transport failure
    Permanent { error: TransportError },
    /// Attempt metadata could not be built
    InvalidAttempt { error: AttemptInfoError },
}

impl DropReason {
    /// Short label used in logs and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::ClientError { .. } => "client_error",
            DropReason::RetriesExhausted { .. } => "retries_exhausted",
            DropReason::Permanent { .. } => "permanent",
            DropReason::InvalidAttempt { .. } => "invalid_attempt",
        }
    }
}

/// Outcome of classifying a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Put the request back with updated bookkeeping
    Retry {
        updated: QueuedRequest,
        reason: &'static str,
    },
    /// Discard the request
    Drop(DropReason),
}

/// Applies the retry rules from a `QueueConfig`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    jitter_range: RangeInclusive<u64>,
    apply_jitter: bool,
}

impl RetryPolicy {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_backoff: config.min_backoff,
            max_backoff: config.max_backoff,
            jitter_range: config.jitter_range.clone(),
            apply_jitter: config.apply_jitter,
        }
    }

    /// Classify `error` for `queued`, drawing jitter at random
    pub fn decide(
        &self,
        queued: &QueuedRequest,
        error: &TransportError,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let jitter_secs = if self.apply_jitter { self.jitter() } else { 0 };
        self.decide_with_jitter(queued, error, now, jitter_secs)
    }

    /// Classify `error` for `queued` with a fixed jitter.
    ///
    /// - Network errors and 5xx: retry without backoff
    /// - Rate limited: retry once `now + clamp(hint) + jitter` has passed
    /// - 4xx: drop
    /// - Anything else: drop
    ///
    /// Retryable failures are dropped once the incremented retry count
    /// exceeds `max_retries`.
    pub fn decide_with_jitter(
        &self,
        queued: &QueuedRequest,
        error: &TransportError,
        now: DateTime<Utc>,
        jitter_secs: u64,
    ) -> RetryDecision {
        match error {
            TransportError::Network(_) => self.retry(queued, None, "network"),
            TransportError::Http { status, .. } if (500..600).contains(status) => {
                self.retry(queued, None, "server_error")
            }
            TransportError::RateLimited { retry_after_secs } => {
                let backoff = self.rate_limit_backoff(*retry_after_secs)
                    + Duration::from_secs(jitter_secs);
                self.retry(queued, Some(backoff_deadline(now, backoff)), "rate_limited")
            }
            TransportError::Http { status, body } if (400..500).contains(status) => {
                RetryDecision::Drop(DropReason::ClientError {
                    status: *status,
                    body: body.clone(),
                })
            }
            TransportError::Http { .. }
            | TransportError::MalformedResponse
            | TransportError::Encoding(_)
            | TransportError::Internal(_)
            | TransportError::Unknown(_) => RetryDecision::Drop(DropReason::Permanent {
                error: error.clone(),
            }),
        }
    }

    /// Server hint raised to `min_backoff` and capped at `max_backoff`
    pub fn rate_limit_backoff(&self, retry_after_secs: u64) -> Duration {
        Duration::from_secs(retry_after_secs)
            .max(self.min_backoff)
            .min(self.max_backoff)
    }

    fn retry(
        &self,
        queued: &QueuedRequest,
        backoff_until: Option<DateTime<Utc>>,
        reason: &'static str,
    ) -> RetryDecision {
        let retry_count = queued.retry_count.saturating_add(1);
        if retry_count > self.max_retries {
            return RetryDecision::Drop(DropReason::RetriesExhausted { retry_count });
        }

        let mut updated = queued.clone();
        updated.retry_count = retry_count;
        if backoff_until.is_some() {
            updated.backoff_until = backoff_until;
        }

        RetryDecision::Retry { updated, reason }
    }

    fn jitter(&self) -> u64 {
        if self.jitter_range.is_empty() {
            return 0;
        }
        rand::rng().random_range(self.jitter_range.clone())
    }
}

fn backoff_deadline(now: DateTime<Utc>, backoff: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(backoff)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
