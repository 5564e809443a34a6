//! End-to-end delivery tests
//!
//! These tests drive the `DeliveryService` facade over a temporary
//! directory with scripted transports, covering restart recovery, retry
//! timing and lifecycle handling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use klaviyo_queue::clock::{Clock, ManualClock};
use klaviyo_queue::queue::{
    DropObserver, DropReason, ProcessorState, QueueConfig, QueuePersistence, QueuedRequest,
    RequestPriority,
};
use klaviyo_queue::request::RequestAttemptInfo;
use klaviyo_queue::storage::LocalFileClient;
use klaviyo_queue::{
    ApiEndpoint, ApiRequest, ApiTransport, DeliveryService, LifecycleEvent, NetworkStatus,
    TransportError,
};

const API_KEY: &str = "ABC123";

/// Replays scripted results in order, succeeding once the script runs out
#[derive(Default)]
struct MockTransport {
    script: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    sent: Mutex<Vec<(String, u32)>>,
}

impl MockTransport {
    fn with_script(results: Vec<Result<Vec<u8>, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    fn attempts(&self) -> Vec<u32> {
        self.sent.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }
}

#[async_trait]
impl ApiTransport for MockTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        attempt: RequestAttemptInfo,
    ) -> Result<Vec<u8>, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((request.id.clone(), attempt.attempt_number()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(b"{}".to_vec()))
    }
}

#[derive(Default)]
struct CollectingObserver {
    dropped: Mutex<Vec<(String, DropReason)>>,
}

impl DropObserver for CollectingObserver {
    fn on_drop(&self, request: &QueuedRequest, reason: &DropReason) {
        self.dropped
            .lock()
            .unwrap()
            .push((request.id().to_owned(), reason.clone()));
    }
}

fn event(id: &str) -> ApiRequest {
    ApiRequest::with_id(
        id,
        API_KEY,
        ApiEndpoint::CreateEvent {
            payload: json!({"metric": "Viewed Product", "properties": {"sku": id}}),
        },
    )
}

fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap(),
    ))
}

async fn create_service(
    dir: &tempfile::TempDir,
    api_key: &str,
    config: QueueConfig,
    transport: Arc<MockTransport>,
    clock: Arc<ManualClock>,
) -> DeliveryService {
    DeliveryService::new(
        api_key,
        config,
        transport,
        Arc::new(LocalFileClient::new(dir.path())),
        clock,
    )
    .await
    .expect("service should build")
}

fn snapshot_json(dir: &tempfile::TempDir, api_key: &str) -> serde_json::Value {
    let path = dir.path().join(format!("klaviyo-{}-queue-v2.json", api_key));
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_pending_requests_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First session: queue work but never deliver it
    {
        let service = create_service(
            &dir,
            API_KEY,
            QueueConfig::default(),
            MockTransport::with_script(vec![]),
            test_clock(),
        )
        .await;

        for id in ["e-1", "e-2", "e-3"] {
            assert!(service.enqueue(event(id)).await);
        }
        assert!(
            service
                .enqueue(ApiRequest::with_id(
                    "token-1",
                    API_KEY,
                    ApiEndpoint::RegisterPushToken {
                        payload: json!({"token": "abcd", "platform": "ios"}),
                    },
                ))
                .await
        );
        service.handle_lifecycle(LifecycleEvent::Terminating).await;
    }

    // Second session picks up where the first left off
    let transport = MockTransport::with_script(vec![]);
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig {
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        },
        transport.clone(),
        test_clock(),
    )
    .await;

    let stats = service.stats().await;
    assert_eq!(stats.immediate, 1);
    assert_eq!(stats.normal, 3);
    assert_eq!(stats.in_flight, 0);

    service.start().await;
    tokio::task::yield_now().await;
    service.flush().await;
    service.stop().await;

    assert_eq!(transport.sent_ids(), vec!["token-1", "e-1", "e-2", "e-3"]);
    assert!(service.queue().is_empty().await);

    let snapshot = snapshot_json(&dir, API_KEY);
    assert_eq!(snapshot["immediate"].as_array().unwrap().len(), 0);
    assert_eq!(snapshot["normal"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_request_in_flight_at_crash_is_redelivered() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();

    {
        let service = create_service(
            &dir,
            API_KEY,
            QueueConfig::default(),
            MockTransport::with_script(vec![]),
            clock.clone(),
        )
        .await;
        service.enqueue(event("e-1")).await;

        // Dequeued but the process dies before the attempt settles
        let taken = service.queue().dequeue().await.unwrap();
        assert_eq!(taken.id(), "e-1");
        service.persist().await.unwrap();
    }

    let transport = MockTransport::with_script(vec![]);
    let service = create_service(&dir, API_KEY, QueueConfig::default(), transport.clone(), clock).await;

    assert_eq!(service.stats().await.in_flight, 0);
    assert!(service.processor().process_next().await);
    assert_eq!(transport.sent_ids(), vec!["e-1"]);
    assert!(service.queue().is_empty().await);
}

#[tokio::test]
async fn test_rate_limit_backoff_is_capped_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let clock = test_clock();
    let transport = MockTransport::with_script(vec![Err(TransportError::RateLimited {
        retry_after_secs: 300,
    })]);
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig {
            max_backoff: Duration::from_secs(180),
            ..Default::default()
        },
        transport.clone(),
        clock.clone(),
    )
    .await;

    service.enqueue(event("evt-1")).await;
    assert!(service.processor().process_next().await);

    let snapshot = service.queue().all_requests().await;
    let entry = &snapshot.normal[0];
    assert_eq!(entry.retry_count, 1);
    assert_eq!(
        entry.backoff_until,
        Some(clock.now() + chrono::Duration::seconds(180))
    );

    let on_disk = snapshot_json(&dir, API_KEY);
    assert_eq!(on_disk["version"], "2");
    assert_eq!(on_disk["apiKey"], API_KEY);
    assert_eq!(on_disk["normal"][0]["retryCount"], 1);
    assert!(on_disk["normal"][0]["backoffUntil"].is_string());

    // Not before the deadline
    clock.advance(chrono::Duration::seconds(179));
    assert!(!service.processor().process_next().await);

    clock.advance(chrono::Duration::seconds(1));
    assert!(service.processor().process_next().await);
    assert_eq!(transport.attempts(), vec![1, 2]);
    assert!(service.queue().is_empty().await);
}

#[tokio::test]
async fn test_backoff_of_one_request_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::with_script(vec![Err(TransportError::RateLimited {
        retry_after_secs: 30,
    })]);
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig::default(),
        transport.clone(),
        test_clock(),
    )
    .await;

    service.enqueue(event("slow")).await;
    service.enqueue(event("fast")).await;

    assert!(service.processor().process_next().await);
    assert!(service.processor().process_next().await);
    assert!(!service.processor().process_next().await);

    assert_eq!(transport.sent_ids(), vec!["slow", "fast"]);
    assert!(service.queue().contains("slow").await);
    assert!(!service.queue().contains("fast").await);
}

#[tokio::test]
async fn test_client_error_is_dropped_with_body() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::with_script(vec![Err(TransportError::Http {
        status: 400,
        body: br#"{"errors":[{"source":{"pointer":"/data/attributes/email"}}]}"#.to_vec(),
    })]);
    let observer = Arc::new(CollectingObserver::default());
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig::default(),
        transport,
        test_clock(),
    )
    .await
    .with_drop_observer(observer.clone());

    service.enqueue(event("bad-email")).await;
    assert!(service.processor().process_next().await);

    assert!(service.queue().is_empty().await);
    assert!(snapshot_json(&dir, API_KEY)["normal"]
        .as_array()
        .unwrap()
        .is_empty());

    let dropped = observer.dropped.lock().unwrap().clone();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].0, "bad-email");
    match &dropped[0].1 {
        DropReason::ClientError { status, body } => {
            assert_eq!(*status, 400);
            assert!(String::from_utf8_lossy(body).contains("/data/attributes/email"));
        }
        other => panic!("unexpected drop reason: {:?}", other),
    }
}

#[tokio::test]
async fn test_retries_exhausted_after_max_retries() {
    let dir = tempfile::tempdir().unwrap();
    let failures = (0..4)
        .map(|_| Err(TransportError::Http {
            status: 503,
            body: Vec::new(),
        }))
        .collect();
    let transport = MockTransport::with_script(failures);
    let observer = Arc::new(CollectingObserver::default());
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig {
            max_retries: 3,
            ..Default::default()
        },
        transport.clone(),
        test_clock(),
    )
    .await
    .with_drop_observer(observer.clone());

    service.enqueue(event("e-1")).await;
    while service.processor().process_next().await {}

    assert_eq!(transport.attempts(), vec![1, 2, 3, 4]);
    assert!(service.queue().is_empty().await);
    assert_eq!(
        observer.dropped.lock().unwrap()[0].1,
        DropReason::RetriesExhausted { retry_count: 4 }
    );
}

#[tokio::test]
async fn test_api_keys_are_isolated() {
    let dir = tempfile::tempdir().unwrap();

    let first = create_service(
        &dir,
        "KEY_A",
        QueueConfig::default(),
        MockTransport::with_script(vec![]),
        test_clock(),
    )
    .await;
    first
        .enqueue(ApiRequest::with_id(
            "a-1",
            "KEY_A",
            ApiEndpoint::CreateEvent { payload: json!({}) },
        ))
        .await;
    tokio_test::assert_ok!(first.persist().await);

    let second = create_service(
        &dir,
        "KEY_B",
        QueueConfig::default(),
        MockTransport::with_script(vec![]),
        test_clock(),
    )
    .await;
    assert!(second.queue().is_empty().await);

    // A foreign snapshot under B's file name is ignored too
    std::fs::copy(
        dir.path().join("klaviyo-KEY_A-queue-v2.json"),
        dir.path().join("klaviyo-KEY_B-queue-v2.json"),
    )
    .unwrap();
    let persistence = QueuePersistence::new("KEY_B", Arc::new(LocalFileClient::new(dir.path())));
    assert!(persistence.load().is_empty());
    assert!(persistence.exists());
}

#[tokio::test]
async fn test_eviction_is_reflected_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig {
            max_queue_size: 2,
            ..Default::default()
        },
        MockTransport::with_script(vec![]),
        test_clock(),
    )
    .await;

    for id in ["a", "b", "c"] {
        service
            .enqueue_with_priority(event(id), RequestPriority::Normal)
            .await;
    }
    service.persist().await.unwrap();

    let on_disk = snapshot_json(&dir, API_KEY);
    let ids: Vec<_> = on_disk["normal"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["request"]["id"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(ids, vec!["b", "c"]);
}

#[tokio::test]
async fn test_lifecycle_and_reachability() {
    let dir = tempfile::tempdir().unwrap();
    let transport = MockTransport::with_script(vec![]);
    let service = create_service(
        &dir,
        API_KEY,
        QueueConfig {
            flush_interval: Duration::from_millis(20),
            ..Default::default()
        },
        transport.clone(),
        test_clock(),
    )
    .await;

    service.handle_lifecycle(LifecycleEvent::Foregrounded).await;
    assert_eq!(service.state(), ProcessorState::Running);

    service.handle_network_change(NetworkStatus::Unreachable).await;
    assert_eq!(service.state(), ProcessorState::Paused);

    service.enqueue(event("offline-1")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(transport.sent_ids().is_empty());

    service.handle_network_change(NetworkStatus::Reachable).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.sent_ids().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request should be delivered once reachable");

    service.handle_lifecycle(LifecycleEvent::Backgrounded).await;
    assert_eq!(service.state(), ProcessorState::Paused);

    service.handle_lifecycle(LifecycleEvent::Terminating).await;
    assert_eq!(service.state(), ProcessorState::Stopped);
    assert!(service.queue().is_empty().await);
}
