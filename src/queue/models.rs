//! Queue data models and configuration

use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::ApiRequest;

/// Configuration for the request queue and its processor.
///
/// Fixed once the queue and processor are built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Capacity of the normal lane; the oldest entry is evicted beyond it
    pub max_queue_size: usize,
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Idle sleep between processing cycles
    pub flush_interval: Duration,
    /// Floor for server-suggested rate-limit backoff
    pub min_backoff: Duration,
    /// Cap for server-suggested rate-limit backoff
    pub max_backoff: Duration,
    /// Whole seconds of random jitter added to rate-limit backoff
    pub jitter_range: RangeInclusive<u64>,
    /// Whether `jitter_range` is applied at all
    pub apply_jitter: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 200,
            max_retries: 50,
            flush_interval: Duration::from_secs(10),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(180), // 3 minutes
            jitter_range: 0..=9,
            apply_jitter: false,
        }
    }
}

impl QueueConfig {
    /// Check the invariants between fields
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_queue_size == 0 {
            return Err(ConfigValidationError::ZeroQueueSize);
        }
        if self.min_backoff > self.max_backoff {
            return Err(ConfigValidationError::BackoffBounds {
                min: self.min_backoff,
                max: self.max_backoff,
            });
        }
        if self.jitter_range.start() > self.jitter_range.end() {
            return Err(ConfigValidationError::JitterRange {
                start: *self.jitter_range.start(),
                end: *self.jitter_range.end(),
            });
        }
        Ok(())
    }

    /// Total attempts a request may get, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Inconsistent queue configuration values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    #[error("max_queue_size must be at least 1")]
    ZeroQueueSize,

    #[error("min_backoff {min:?} is greater than max_backoff {max:?}")]
    BackoffBounds { min: Duration, max: Duration },

    #[error("jitter range {start}..={end} is empty")]
    JitterRange { start: u64, end: u64 },

    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },
}

/// Lane a request waits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Unbounded lane, always served first
    Immediate,
    /// Bounded lane
    Normal,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Immediate => "immediate",
            RequestPriority::Normal => "normal",
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request waiting for delivery, with its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    /// The wrapped API request
    pub request: ApiRequest,
    /// Failed attempts so far
    pub retry_count: u32,
    /// When the request was first queued
    pub created_at: DateTime<Utc>,
    /// Not eligible for dequeue before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<DateTime<Utc>>,
}

impl QueuedRequest {
    /// Wrap a freshly produced request
    pub fn new(request: ApiRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            request,
            retry_count: 0,
            created_at,
            backoff_until: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    /// Whether the request may be sent at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.map_or(true, |until| until <= now)
    }
}

/// Point-in-time copy of both lanes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub immediate: Vec<QueuedRequest>,
    pub normal: Vec<QueuedRequest>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.immediate.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.normal.is_empty()
    }
}

/// Statistics about the request queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub immediate: usize,
    pub normal: usize,
    pub in_flight: usize,
    pub max_queue_size: usize,
}
