//! Prometheus metrics for the request queue.
//!
//! - Enqueue / eviction counts per lane
//! - Delivery outcomes (delivered, retried, dropped by reason)
//! - Queue depth per lane
//! - Persistence failures
//! - Transport latency

mod helpers;

pub use helpers::{encode_metrics, QueueMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "klaviyo";

lazy_static! {
    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Requests accepted into a lane
    pub static ref REQUESTS_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_enqueued_total", METRIC_PREFIX),
        "Total requests accepted into the queue",
        &["lane"]
    ).unwrap();

    /// Normal-lane requests evicted because the lane was full
    pub static ref REQUESTS_EVICTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_requests_evicted_total", METRIC_PREFIX),
        "Total requests evicted from a full normal lane"
    ).unwrap();

    /// Current number of queued requests per lane
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Number of requests currently queued",
        &["lane"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Requests the API accepted
    pub static ref REQUESTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_requests_delivered_total", METRIC_PREFIX),
        "Total requests delivered successfully"
    ).unwrap();

    /// Requests put back for another attempt
    pub static ref REQUESTS_RETRIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_retried_total", METRIC_PREFIX),
        "Total requests requeued for retry",
        &["reason"]
    ).unwrap();

    /// Requests permanently discarded
    pub static ref REQUESTS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_requests_dropped_total", METRIC_PREFIX),
        "Total requests dropped without delivery",
        &["reason"]
    ).unwrap();

    /// Time spent inside the transport per attempt
    pub static ref REQUEST_DELIVERY_SECONDS: Histogram = register_histogram!(
        format!("{}_request_delivery_seconds", METRIC_PREFIX),
        "Transport call latency in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Persistence Metrics
    // ============================================================================

    /// Snapshot writes that failed
    pub static ref QUEUE_PERSIST_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_persist_failures_total", METRIC_PREFIX),
        "Total failed queue snapshot writes"
    ).unwrap();
}
