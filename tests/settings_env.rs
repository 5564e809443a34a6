//! Environment-driven configuration tests
//!
//! Kept in their own test binary with a single test so that the process-wide
//! environment variables they set cannot leak into other tests.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;

use klaviyo_queue::config::Settings;
use klaviyo_queue::request::RequestAttemptInfo;
use klaviyo_queue::{ApiRequest, ApiTransport, DeliveryService, SdkError, TransportError};

struct NoopTransport;

#[async_trait]
impl ApiTransport for NoopTransport {
    async fn send(&self, _: &ApiRequest, _: RequestAttemptInfo) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_environment_overrides() {
    let dir = tempfile::tempdir().unwrap();

    env::set_var("KLAVIYO__API_KEY", "ENV_KEY_9");
    env::set_var("KLAVIYO__QUEUE__MAX_RETRIES", "7");
    env::set_var("KLAVIYO__QUEUE__FLUSH_INTERVAL_SECS", "2.5");
    env::set_var("KLAVIYO__STORAGE__DIRECTORY", dir.path());
    env::set_var("KLAVIYO__LOGGING__JSON", "true");

    let settings = Settings::new().expect("settings should load from the environment");
    assert_eq!(settings.api_key, "ENV_KEY_9");
    assert_eq!(settings.queue.max_retries, 7);
    assert_eq!(settings.queue.flush_interval_secs, 2.5);
    assert_eq!(settings.queue.max_queue_size, 200);
    assert_eq!(settings.storage.directory, dir.path());
    assert!(settings.logging.json);
    assert_eq!(settings.logging.level, "info");

    let service = DeliveryService::from_env(Arc::new(NoopTransport))
        .await
        .expect("service should build from the environment");
    assert_eq!(service.api_key(), "ENV_KEY_9");
    assert_eq!(service.queue().config().max_retries, 7);
    assert_eq!(service.queue().config().max_attempts(), 8);
    drop(service);

    // api_key has no default
    env::remove_var("KLAVIYO__API_KEY");
    let result = DeliveryService::from_env(Arc::new(NoopTransport)).await;
    assert!(matches!(result, Err(SdkError::Config(_))));

    // Invalid values surface as validation errors
    env::set_var("KLAVIYO__API_KEY", "ENV_KEY_9");
    env::set_var("KLAVIYO__QUEUE__MAX_QUEUE_SIZE", "0");
    let result = DeliveryService::from_env(Arc::new(NoopTransport)).await;
    assert!(matches!(result, Err(SdkError::InvalidConfig(_))));

    for key in [
        "KLAVIYO__API_KEY",
        "KLAVIYO__QUEUE__MAX_RETRIES",
        "KLAVIYO__QUEUE__FLUSH_INTERVAL_SECS",
        "KLAVIYO__QUEUE__MAX_QUEUE_SIZE",
        "KLAVIYO__STORAGE__DIRECTORY",
        "KLAVIYO__LOGGING__JSON",
    ] {
        env::remove_var(key);
    }
}
