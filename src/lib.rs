// Supporting modules
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod telemetry;

// Queueing and delivery
pub mod queue;
pub mod request;

// Host-facing facade
pub mod service;

pub use error::{Result, SdkError};
pub use queue::{QueueConfig, QueueProcessor, RequestPriority, RequestQueue};
pub use request::{ApiEndpoint, ApiRequest, ApiTransport, TransportError};
pub use service::{DeliveryService, LifecycleEvent, NetworkStatus};
