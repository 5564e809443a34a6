//! Metrics helper struct for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    QUEUE_DEPTH, QUEUE_PERSIST_FAILURES_TOTAL, REQUESTS_DELIVERED_TOTAL, REQUESTS_DROPPED_TOTAL,
    REQUESTS_ENQUEUED_TOTAL, REQUESTS_EVICTED_TOTAL, REQUESTS_RETRIED_TOTAL,
    REQUEST_DELIVERY_SECONDS,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording queue and delivery metrics
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a request accepted into `lane`
    pub fn record_enqueued(lane: &str) {
        REQUESTS_ENQUEUED_TOTAL.with_label_values(&[lane]).inc();
    }

    /// Record an eviction from the normal lane
    pub fn record_evicted() {
        REQUESTS_EVICTED_TOTAL.inc();
    }

    /// Update the depth gauges for both lanes
    pub fn set_depth(immediate: usize, normal: usize) {
        QUEUE_DEPTH
            .with_label_values(&["immediate"])
            .set(immediate as i64);
        QUEUE_DEPTH.with_label_values(&["normal"]).set(normal as i64);
    }

    /// Record a successful delivery
    pub fn record_delivered() {
        REQUESTS_DELIVERED_TOTAL.inc();
    }

    /// Record a requeue for another attempt
    pub fn record_retried(reason: &str) {
        REQUESTS_RETRIED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a permanent drop
    pub fn record_dropped(reason: &str) {
        REQUESTS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record transport latency for one attempt
    pub fn record_latency(elapsed: Duration) {
        REQUEST_DELIVERY_SECONDS.observe(elapsed.as_secs_f64());
    }

    /// Record a failed snapshot write
    pub fn record_persist_failure() {
        QUEUE_PERSIST_FAILURES_TOTAL.inc();
    }
}
