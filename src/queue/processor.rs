//! Background delivery loop for the request queue.
//!
//! The processor repeatedly takes the next ready request, sends it through
//! the transport, settles the result in the queue and writes a snapshot.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::metrics::QueueMetrics;
use crate::request::{ApiTransport, RequestAttemptInfo, TransportError};

use super::models::{QueueConfig, QueuedRequest};
use super::persistence::{PersistenceError, QueuePersistence};
use super::request_queue::RequestQueue;
use super::retry::{DropReason, RetryDecision, RetryPolicy};

/// Sleep between checks while paused
const PAUSED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Processor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    /// No loop task exists
    Stopped = 0,
    /// Loop is delivering requests
    Running = 1,
    /// Loop exists but skips work
    Paused = 2,
}

impl From<u8> for ProcessorState {
    fn from(value: u8) -> Self {
        match value {
            1 => ProcessorState::Running,
            2 => ProcessorState::Paused,
            _ => ProcessorState::Stopped,
        }
    }
}

/// Notified whenever a request is permanently dropped.
///
/// Hook for reacting to rejected payloads, e.g. inspecting the 4xx body
/// for field-level validation errors.
pub trait DropObserver: Send + Sync {
    fn on_drop(&self, request: &QueuedRequest, reason: &DropReason);
}

struct ProcessorCore {
    queue: Arc<RequestQueue>,
    persistence: Arc<QueuePersistence>,
    transport: Arc<dyn ApiTransport>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    policy: RetryPolicy,
    drop_observer: RwLock<Option<Arc<dyn DropObserver>>>,
    state: AtomicU8,
    /// Cuts the idle sleep short
    wake: Notify,
    /// Serializes snapshot-and-write so an older snapshot never lands last
    persist_lock: Mutex<()>,
}

struct LoopHandle {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Drives delivery of queued requests.
///
/// # Lifecycle
///
/// `Stopped -> Running -> (Paused <-> Running) -> Stopped`. `start` spawns the
/// loop, `stop` signals it and waits for the request in progress (if any) to
/// settle. Pausing keeps the loop alive but idle.
pub struct QueueProcessor {
    core: Arc<ProcessorCore>,
    task: Mutex<Option<LoopHandle>>,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<RequestQueue>,
        persistence: Arc<QueuePersistence>,
        transport: Arc<dyn ApiTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = queue.config().clone();
        let policy = RetryPolicy::new(&config);

        Self {
            core: Arc::new(ProcessorCore {
                queue,
                persistence,
                transport,
                clock,
                config,
                policy,
                drop_observer: RwLock::new(None),
                state: AtomicU8::new(ProcessorState::Stopped as u8),
                wake: Notify::new(),
                persist_lock: Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Install a drop observer
    pub fn with_drop_observer(self, observer: Arc<dyn DropObserver>) -> Self {
        self.set_drop_observer(observer);
        self
    }

    /// Replace the drop observer
    pub fn set_drop_observer(&self, observer: Arc<dyn DropObserver>) {
        let mut slot = self
            .core
            .drop_observer
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(observer);
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ProcessorState {
        self.core.state()
    }

    /// Spawn the processing loop. No-op unless stopped.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if self.core.state() != ProcessorState::Stopped {
            return;
        }

        self.core.set_state(ProcessorState::Running);

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let core = self.core.clone();
        let handle = tokio::spawn(async move {
            core.run(shutdown_rx).await;
        });

        *task = Some(LoopHandle { shutdown, handle });
    }

    /// Keep the loop alive but stop delivering
    pub fn pause(&self) {
        if self.core.transition(ProcessorState::Running, ProcessorState::Paused) {
            tracing::info!("Queue processor paused");
        }
    }

    /// Resume delivering, starting the loop if it is stopped
    pub async fn resume(&self) {
        if self.core.transition(ProcessorState::Paused, ProcessorState::Running) {
            tracing::info!("Queue processor resumed");
            self.core.wake.notify_one();
            return;
        }
        self.start().await;
    }

    /// Halt the loop.
    ///
    /// A request already handed to the transport is allowed to finish and
    /// is settled before this returns.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        self.core.set_state(ProcessorState::Stopped);

        if let Some(LoopHandle { shutdown, handle }) = task.take() {
            let _ = shutdown.send(());
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Queue processor task failed");
            }
        }
    }

    /// Cut the current idle sleep short
    pub fn wake(&self) {
        self.core.wake.notify_one();
    }

    /// Drain the queue now.
    ///
    /// Does nothing unless running. Stops early when nothing is ready (all
    /// remaining requests are backing off or in flight) or when the
    /// processor leaves the running state. Returns how many requests were
    /// processed.
    pub async fn flush(&self) -> usize {
        if self.core.state() != ProcessorState::Running {
            tracing::debug!(state = ?self.core.state(), "Flush skipped, processor not running");
            return 0;
        }

        let mut processed = 0;
        while self.core.state() == ProcessorState::Running && !self.core.queue.is_empty().await {
            if !self.core.process_next().await {
                break;
            }
            processed += 1;
        }

        tracing::debug!(processed = processed, "Flush completed");
        processed
    }

    /// Process a single request. Returns `false` when nothing was ready.
    pub async fn process_next(&self) -> bool {
        self.core.process_next().await
    }

    /// Write the current queue contents to disk
    pub async fn persist(&self) -> Result<(), PersistenceError> {
        self.core.persist().await
    }
}

impl Drop for QueueProcessor {
    fn drop(&mut self) {
        self.core.set_state(ProcessorState::Stopped);
        if let Some(LoopHandle { shutdown, .. }) = self.task.get_mut().take() {
            let _ = shutdown.send(());
        }
    }
}

impl ProcessorCore {
    fn state(&self) -> ProcessorState {
        ProcessorState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ProcessorState, to: ProcessorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            "Queue processor started"
        );

        loop {
            if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            let idle = match self.state() {
                ProcessorState::Stopped => break,
                ProcessorState::Paused => PAUSED_POLL_INTERVAL,
                ProcessorState::Running => {
                    if self.process_next().await {
                        continue;
                    }
                    self.config.flush_interval
                }
            };

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        tracing::info!("Queue processor stopped");
    }

    async fn process_next(&self) -> bool {
        let Some(queued) = self.queue.dequeue().await else {
            return false;
        };

        let attempt_number = queued.retry_count.saturating_add(1);
        match RequestAttemptInfo::new(attempt_number, self.config.max_attempts()) {
            Ok(attempt) => {
                let started = Instant::now();
                let result = self.transport.send(&queued.request, attempt).await;
                QueueMetrics::record_latency(started.elapsed());

                match result {
                    Ok(_) => {
                        self.queue.complete(queued.id()).await;
                        QueueMetrics::record_delivered();
                        tracing::debug!(
                            request_id = %queued.id(),
                            attempt = attempt_number,
                            "Request delivered"
                        );
                    }
                    Err(error) => self.handle_failure(&queued, &error).await,
                }
            }
            Err(error) => {
                self.queue.fail(queued.id(), false, None).await;
                self.report_drop(&queued, DropReason::InvalidAttempt { error });
            }
        }

        if let Err(e) = self.persist().await {
            QueueMetrics::record_persist_failure();
            tracing::warn!(
                error = %e,
                request_id = %queued.id(),
                "Failed to persist queue, continuing with in-memory state"
            );
        }

        true
    }

    async fn handle_failure(&self, queued: &QueuedRequest, error: &TransportError) {
        match self.policy.decide(queued, error, self.clock.now()) {
            RetryDecision::Retry { updated, reason } => {
                QueueMetrics::record_retried(reason);
                tracing::info!(
                    request_id = %queued.id(),
                    retry_count = updated.retry_count,
                    backoff_until = ?updated.backoff_until,
                    error = %error,
                    "Request failed, scheduled for retry"
                );
                self.queue.fail(queued.id(), true, Some(updated)).await;
            }
            RetryDecision::Drop(reason) => {
                self.queue.fail(queued.id(), false, None).await;
                self.report_drop(queued, reason);
            }
        }
    }

    fn report_drop(&self, queued: &QueuedRequest, reason: DropReason) {
        match &reason {
            DropReason::ClientError { status, body } => tracing::warn!(
                request_id = %queued.id(),
                status = status,
                body = %String::from_utf8_lossy(body),
                "Request rejected by API, dropping"
            ),
            DropReason::RetriesExhausted { retry_count } => tracing::warn!(
                request_id = %queued.id(),
                retry_count = retry_count,
                max_retries = self.config.max_retries,
                "Request exceeded max retries, dropping"
            ),
            DropReason::Permanent { error } => tracing::error!(
                request_id = %queued.id(),
                error = %error,
                kind = error.kind(),
                "Request failed permanently, dropping"
            ),
            DropReason::InvalidAttempt { error } => tracing::error!(
                request_id = %queued.id(),
                error = %error,
                retry_count = queued.retry_count,
                "Invalid attempt metadata, dropping"
            ),
        }

        QueueMetrics::record_dropped(reason.label());

        let observer = self
            .drop_observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.on_drop(queued, &reason);
        }
    }

    async fn persist(&self) -> Result<(), PersistenceError> {
        let _guard = self.persist_lock.lock().await;

        let snapshot = self.queue.all_requests().await;
        let persistence = self.persistence.clone();
        tokio::task::spawn_blocking(move || {
            persistence.save(&snapshot.immediate, &snapshot.normal)
        })
        .await?
    }
}
