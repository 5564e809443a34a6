//! Host-facing facade over the queue, its persistence and the processor.
//!
//! Wires the pieces together for one API key, restores the persisted
//! snapshot on construction and maps app lifecycle and reachability
//! changes onto processor transitions.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::Result;
use crate::metrics::QueueMetrics;
use crate::queue::{
    DropObserver, ProcessorState, QueueConfig, QueuePersistence, QueueProcessor, QueueStats,
    RequestPriority, RequestQueue,
};
use crate::request::{ApiRequest, ApiTransport};
use crate::storage::{FileClient, LocalFileClient};

/// App lifecycle transitions reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foregrounded,
    Backgrounded,
    Terminating,
}

/// Network reachability reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Reachable,
    Unreachable,
}

/// Request delivery for one API key.
pub struct DeliveryService {
    queue: Arc<RequestQueue>,
    persistence: Arc<QueuePersistence>,
    processor: QueueProcessor,
}

impl DeliveryService {
    /// Build the service and restore any persisted requests.
    ///
    /// The processor is left stopped; call [`start`](Self::start) or report
    /// [`LifecycleEvent::Foregrounded`] to begin delivery.
    pub async fn new(
        api_key: impl Into<String>,
        config: QueueConfig,
        transport: Arc<dyn ApiTransport>,
        file_client: Arc<dyn FileClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(RequestQueue::new(config, clock.clone()));
        let persistence = Arc::new(QueuePersistence::new(api_key, file_client));

        let snapshot = persistence.load();
        if !snapshot.is_empty() {
            queue.restore(snapshot.immediate, snapshot.normal).await;
        }

        let processor = QueueProcessor::new(queue.clone(), persistence.clone(), transport, clock);

        tracing::info!(
            path = %persistence.file_path().display(),
            restored = queue.len().await,
            "Delivery service initialized"
        );

        Ok(Self {
            queue,
            persistence,
            processor,
        })
    }

    /// Build from loaded settings, storing snapshots on the local filesystem
    pub async fn from_settings(settings: &Settings, transport: Arc<dyn ApiTransport>) -> Result<Self> {
        let config = settings.queue.to_queue_config()?;
        let file_client = Arc::new(LocalFileClient::new(settings.storage.directory.clone()));

        Self::new(
            settings.api_key.clone(),
            config,
            transport,
            file_client,
            Arc::new(SystemClock),
        )
        .await
    }

    /// Load settings from files and `KLAVIYO__*` environment variables,
    /// then build as [`from_settings`](Self::from_settings) does
    pub async fn from_env(transport: Arc<dyn ApiTransport>) -> Result<Self> {
        let settings = Settings::new()?;
        Self::from_settings(&settings, transport).await
    }

    /// Install a drop observer on the processor
    pub fn with_drop_observer(self, observer: Arc<dyn DropObserver>) -> Self {
        self.processor.set_drop_observer(observer);
        self
    }

    pub fn api_key(&self) -> &str {
        self.persistence.api_key()
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn processor(&self) -> &QueueProcessor {
        &self.processor
    }

    /// Queue a request in its endpoint's default lane
    pub async fn enqueue(&self, request: ApiRequest) -> bool {
        let priority = request.default_priority();
        self.enqueue_with_priority(request, priority).await
    }

    /// Queue a request in an explicit lane.
    ///
    /// Immediate requests wake an idle processor instead of waiting for the
    /// next flush interval.
    pub async fn enqueue_with_priority(&self, request: ApiRequest, priority: RequestPriority) -> bool {
        if request.api_key != self.api_key() {
            tracing::warn!(
                request_id = %request.id,
                "Request API key differs from the queue's API key"
            );
        }

        let added = self.queue.enqueue(request, priority).await;
        if added && priority == RequestPriority::Immediate {
            self.processor.wake();
        }
        added
    }

    pub async fn start(&self) {
        self.processor.start().await;
    }

    pub async fn stop(&self) {
        self.processor.stop().await;
    }

    pub fn pause(&self) {
        self.processor.pause();
    }

    pub async fn resume(&self) {
        self.processor.resume().await;
    }

    /// Drain ready requests now. See [`QueueProcessor::flush`].
    pub async fn flush(&self) -> usize {
        self.processor.flush().await
    }

    /// Write the current queue contents to disk
    pub async fn persist(&self) -> Result<()> {
        self.processor.persist().await?;
        Ok(())
    }

    pub async fn stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub fn state(&self) -> ProcessorState {
        self.processor.state()
    }

    /// React to an app lifecycle transition
    #[tracing::instrument(name = "lifecycle_event", skip(self))]
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Foregrounded => {
                self.processor.resume().await;
            }
            LifecycleEvent::Backgrounded => {
                let flushed = self.processor.flush().await;
                self.processor.pause();
                tracing::info!(flushed = flushed, "Flushed queue before backgrounding");
                self.persist_best_effort().await;
            }
            LifecycleEvent::Terminating => {
                self.processor.stop().await;
                self.persist_best_effort().await;
            }
        }
    }

    /// React to a reachability change
    pub async fn handle_network_change(&self, status: NetworkStatus) {
        tracing::info!(status = ?status, "Network reachability changed");
        match status {
            NetworkStatus::Reachable => self.processor.resume().await,
            NetworkStatus::Unreachable => self.processor.pause(),
        }
    }

    async fn persist_best_effort(&self) {
        if let Err(e) = self.processor.persist().await {
            QueueMetrics::record_persist_failure();
            tracing::warn!(error = %e, "Failed to persist queue");
        }
    }
}
