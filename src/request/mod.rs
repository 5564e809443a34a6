//! Outbound API requests and the transport contract.
//!
//! The queue treats request bodies as opaque. It only relies on the stable
//! `id` and on the request being serializable so that it survives restarts.

mod attempt;
mod error;
mod transport;

pub use attempt::{AttemptInfoError, RequestAttemptInfo};
pub use error::TransportError;
pub use transport::ApiTransport;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::queue::RequestPriority;

/// Remote endpoint a request targets, with its JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiEndpoint {
    CreateProfile { payload: Value },
    CreateEvent { payload: Value },
    AggregateEvent { payload: Value },
    RegisterPushToken { payload: Value },
    UnregisterPushToken { payload: Value },
}

impl ApiEndpoint {
    /// Route of the endpoint relative to the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            ApiEndpoint::CreateProfile { .. } => "client/profiles/",
            ApiEndpoint::CreateEvent { .. } => "client/events/",
            ApiEndpoint::AggregateEvent { .. } => "onsite/track-analytics",
            ApiEndpoint::RegisterPushToken { .. } => "client/push-tokens/",
            ApiEndpoint::UnregisterPushToken { .. } => "client/push-token-unregister/",
        }
    }

    /// Lane used when the producer does not pick one.
    ///
    /// Push token changes go to the immediate lane, everything else to normal.
    pub fn default_priority(&self) -> RequestPriority {
        match self {
            ApiEndpoint::RegisterPushToken { .. } | ApiEndpoint::UnregisterPushToken { .. } => {
                RequestPriority::Immediate
            }
            ApiEndpoint::CreateProfile { .. }
            | ApiEndpoint::CreateEvent { .. }
            | ApiEndpoint::AggregateEvent { .. } => RequestPriority::Normal,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            ApiEndpoint::CreateProfile { payload }
            | ApiEndpoint::CreateEvent { payload }
            | ApiEndpoint::AggregateEvent { payload }
            | ApiEndpoint::RegisterPushToken { payload }
            | ApiEndpoint::UnregisterPushToken { payload } => payload,
        }
    }
}

/// One outbound API request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    /// Stable identity, unchanged across retries and restarts
    pub id: String,
    /// Public API key the request is sent under
    pub api_key: String,
    pub endpoint: ApiEndpoint,
}

impl ApiRequest {
    /// Create a request with a fresh UUID v4 id
    pub fn new(api_key: impl Into<String>, endpoint: ApiEndpoint) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            api_key: api_key.into(),
            endpoint,
        }
    }

    /// Create a request keeping a caller-supplied id
    pub fn with_id(id: impl Into<String>, api_key: impl Into<String>, endpoint: ApiEndpoint) -> Self {
        Self {
            id: id.into(),
            api_key: api_key.into(),
            endpoint,
        }
    }

    pub fn create_event(api_key: impl Into<String>, payload: Value) -> Self {
        Self::new(api_key, ApiEndpoint::CreateEvent { payload })
    }

    pub fn create_profile(api_key: impl Into<String>, payload: Value) -> Self {
        Self::new(api_key, ApiEndpoint::CreateProfile { payload })
    }

    pub fn aggregate_event(api_key: impl Into<String>, payload: Value) -> Self {
        Self::new(api_key, ApiEndpoint::AggregateEvent { payload })
    }

    pub fn register_push_token(api_key: impl Into<String>, payload: Value) -> Self {
        Self::new(api_key, ApiEndpoint::RegisterPushToken { payload })
    }

    pub fn unregister_push_token(api_key: impl Into<String>, payload: Value) -> Self {
        Self::new(api_key, ApiEndpoint::UnregisterPushToken { payload })
    }

    /// Lane this request lands in by default
    pub fn default_priority(&self) -> RequestPriority {
        self.endpoint.default_priority()
    }
}
