use async_trait::async_trait;

use super::{ApiRequest, RequestAttemptInfo, TransportError};

/// Sends one request to the remote API.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the processor calls them from its
/// background task while producers keep enqueueing.
///
/// # Timeouts
///
/// The queue imposes none. Implementations may scale their timeout by
/// `attempt.attempt_number()`.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Execute `request` and return the response body on success.
    async fn send(
        &self,
        request: &ApiRequest,
        attempt: RequestAttemptInfo,
    ) -> Result<Vec<u8>, TransportError>;
}
