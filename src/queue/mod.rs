//! Request queueing and delivery.
//!
//! Requests wait in one of two lanes of a [`RequestQueue`]. A
//! [`QueueProcessor`] drains them through an [`ApiTransport`], applying the
//! [`RetryPolicy`] to failures, and writes a snapshot through
//! [`QueuePersistence`] after every attempt so pending work survives a
//! restart.
//!
//! [`ApiTransport`]: crate::request::ApiTransport

mod models;
mod persistence;
mod processor;
mod request_queue;
mod retry;

pub use models::{
    ConfigValidationError, QueueConfig, QueueSnapshot, QueueStats, QueuedRequest,
    RequestPriority,
};
pub use persistence::{PersistenceError, QueuePersistence, QUEUE_FORMAT_VERSION};
pub use processor::{DropObserver, ProcessorState, QueueProcessor};
pub use request_queue::RequestQueue;
pub use retry::{DropReason, RetryDecision, RetryPolicy};
