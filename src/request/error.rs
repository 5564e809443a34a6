use thiserror::Error;

/// Failure reported by the transport for a single attempt.
///
/// The retry policy matches on every variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connectivity or transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Server asked us to slow down, with a suggested backoff in seconds
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Non-success HTTP status with the raw response body
    #[error("http error: status {status}")]
    Http { status: u16, body: Vec<u8> },

    /// Response missing or not shaped as expected
    #[error("missing or invalid response")]
    MalformedResponse,

    /// Request could not be encoded
    #[error("data encoding error: {0}")]
    Encoding(String),

    /// Bug or invalid state inside the client
    #[error("internal error: {0}")]
    Internal(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl TransportError {
    /// Short label used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Network(_) => "network",
            TransportError::RateLimited { .. } => "rate_limited",
            TransportError::Http { status, .. } if (500..600).contains(status) => "server_error",
            TransportError::Http { status, .. } if (400..500).contains(status) => "client_error",
            TransportError::Http { .. } => "http_other",
            TransportError::MalformedResponse => "malformed_response",
            TransportError::Encoding(_) => "encoding",
            TransportError::Internal(_) => "internal",
            TransportError::Unknown(_) => "unknown",
        }
    }
}
