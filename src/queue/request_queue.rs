//! Two-lane in-memory request queue with in-flight tracking.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::metrics::QueueMetrics;
use crate::request::ApiRequest;

use super::models::{QueueConfig, QueueSnapshot, QueueStats, QueuedRequest, RequestPriority};

#[derive(Debug, Default)]
struct QueueState {
    immediate: VecDeque<QueuedRequest>,
    normal: VecDeque<QueuedRequest>,
    /// Ids handed out by `dequeue` and not yet completed or failed
    in_flight: HashSet<String>,
}

impl QueueState {
    fn contains(&self, id: &str) -> bool {
        self.immediate.iter().any(|r| r.id() == id) || self.normal.iter().any(|r| r.id() == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut QueuedRequest> {
        if let Some(entry) = self.immediate.iter_mut().find(|r| r.id() == id) {
            return Some(entry);
        }
        self.normal.iter_mut().find(|r| r.id() == id)
    }

    fn remove(&mut self, id: &str) -> Option<QueuedRequest> {
        if let Some(pos) = self.immediate.iter().position(|r| r.id() == id) {
            return self.immediate.remove(pos);
        }
        if let Some(pos) = self.normal.iter().position(|r| r.id() == id) {
            return self.normal.remove(pos);
        }
        None
    }

    fn update_depth_metrics(&self) {
        QueueMetrics::set_depth(self.immediate.len(), self.normal.len());
    }
}

/// Queue of requests awaiting delivery.
///
/// # Design
///
/// - Two lanes: `immediate` (unbounded) is always served before `normal`
/// - `normal` holds at most `max_queue_size` entries; the oldest is evicted
/// - In-flight is an overlay on the lanes, not a separate list
/// - Every operation runs under one async mutex, so a `dequeue` can never
///   hand out an id that another caller already holds
pub struct RequestQueue {
    state: Mutex<QueueState>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl RequestQueue {
    /// Create an empty queue
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            config,
            clock,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a request to `priority`'s lane.
    ///
    /// No-op if the id is already queued or in flight. Returns whether the
    /// request was added.
    pub async fn enqueue(&self, request: ApiRequest, priority: RequestPriority) -> bool {
        let mut state = self.state.lock().await;

        if state.in_flight.contains(&request.id) || state.contains(&request.id) {
            tracing::debug!(
                request_id = %request.id,
                lane = %priority,
                "Request already queued or in flight, ignoring"
            );
            return false;
        }

        let queued = QueuedRequest::new(request, self.clock.now());
        let request_id = queued.id().to_owned();

        match priority {
            RequestPriority::Immediate => state.immediate.push_back(queued),
            RequestPriority::Normal => {
                // If lane is full, remove oldest request
                if state.normal.len() >= self.config.max_queue_size {
                    if let Some(evicted) = state.normal.pop_front() {
                        QueueMetrics::record_evicted();
                        tracing::warn!(
                            evicted_id = %evicted.id(),
                            max_queue_size = self.config.max_queue_size,
                            "Dropped oldest request from full normal lane"
                        );
                    }
                }
                state.normal.push_back(queued);
            }
        }

        QueueMetrics::record_enqueued(priority.as_str());
        state.update_depth_metrics();

        tracing::debug!(
            request_id = %request_id,
            lane = %priority,
            immediate = state.immediate.len(),
            normal = state.normal.len(),
            "Request enqueued"
        );

        true
    }

    /// Take the next ready request and mark it in flight.
    ///
    /// Scans `immediate` then `normal`, each in enqueue order, skipping
    /// entries that are in flight or still backing off.
    pub async fn dequeue(&self) -> Option<QueuedRequest> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let next = state
            .immediate
            .iter()
            .chain(state.normal.iter())
            .find(|r| !state.in_flight.contains(r.id()) && r.is_ready(now))
            .cloned()?;

        state.in_flight.insert(next.id().to_owned());

        tracing::debug!(
            request_id = %next.id(),
            retry_count = next.retry_count,
            "Request dequeued"
        );

        Some(next)
    }

    /// Remove a delivered request. Unknown ids are ignored.
    pub async fn complete(&self, id: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);
        if state.remove(id).is_some() {
            state.update_depth_metrics();
        }
    }

    /// Settle a failed attempt.
    ///
    /// With `should_retry`, the entry is replaced in place by `updated`
    /// (when given) and stays in its lane position. Otherwise it is dropped.
    pub async fn fail(&self, id: &str, should_retry: bool, updated: Option<QueuedRequest>) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(id);

        if should_retry {
            if let Some(updated) = updated {
                match state.find_mut(id) {
                    Some(entry) => *entry = updated,
                    None => tracing::debug!(
                        request_id = %id,
                        "Failed request no longer queued, retry update discarded"
                    ),
                }
            }
        } else if state.remove(id).is_some() {
            state.update_depth_metrics();
        }
    }

    /// Copy of both lanes, in-flight entries included
    pub async fn all_requests(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            immediate: state.immediate.iter().cloned().collect(),
            normal: state.normal.iter().cloned().collect(),
        }
    }

    /// Replace both lanes and clear in-flight markers
    pub async fn restore(&self, immediate: Vec<QueuedRequest>, normal: Vec<QueuedRequest>) {
        let mut state = self.state.lock().await;
        state.immediate = immediate.into();
        state.normal = normal.into();
        state.in_flight.clear();
        state.update_depth_metrics();

        tracing::info!(
            immediate = state.immediate.len(),
            normal = state.normal.len(),
            "Request queue restored"
        );
    }

    /// Empty both lanes and the in-flight set
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.immediate.clear();
        state.normal.clear();
        state.in_flight.clear();
        state.update_depth_metrics();
    }

    /// Whether `id` is queued in either lane
    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.contains(id)
    }

    /// Number of queued requests across both lanes
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.immediate.len() + state.normal.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get queue statistics
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            immediate: state.immediate.len(),
            normal: state.normal.len(),
            in_flight: state.in_flight.len(),
            max_queue_size: self.config.max_queue_size,
        }
    }
}
