//! Chaos testing for the delivery pipeline.
//!
//! This module tests failure scenarios using:
//! 1. **FailingTransport** - scripted network failures and stalls
//! 2. **FailingStorage** - precise error injection into the key-value backend
//! 3. **Data corruption** - garbage left in persisted queues
//!
//! Run with: `cargo test --test chaos`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use beacon_sdk::storage::memory::MemoryBackend;
use beacon_sdk::{
    DeliveryAttempt, DeviceIdType, EventInput, HttpRequest, HttpResponse, ManualClock, Request, SdkConfig,
    SkipReason, StorageBackend, StorageError, TrackerBuilder, Transport, TransportError,
};

// =============================================================================
// Failing Wrappers - Precise Error Injection
// =============================================================================

/// Fails the first `fail_first` calls, then answers `{"result":"Success"}`.
/// With `fail_first == u64::MAX` it never recovers.
struct FailingTransport {
    calls: AtomicU64,
    fail_first: u64,
    error: TransportError,
}

impl FailingTransport {
    fn new(fail_first: u64, error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            fail_first,
            error,
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(self.error.clone());
        }
        Ok(HttpResponse {
            status: 200,
            body: r#"{"result":"Success"}"#.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Blocks inside `execute` until released, so a delivery can be held
/// in flight.
#[derive(Default)]
struct StallingTransport {
    entered: Notify,
    release: Notify,
    seen: parking_lot::Mutex<Vec<HttpRequest>>,
}

#[async_trait]
impl Transport for StallingTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.seen.lock().push(request);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(HttpResponse {
            status: 200,
            body: r#"{"result":"Success"}"#.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "stalling"
    }
}

/// Wraps a `MemoryBackend`; reads and/or writes can be switched to fail.
struct FailingStorage {
    inner: MemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_attempts: AtomicU64,
}

impl FailingStorage {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_attempts: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl StorageBackend for FailingStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".into()));
        }
        self.inner.set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".into()));
        }
        self.inner.remove_item(key).await
    }

    fn name(&self) -> &'static str {
        "failing-storage"
    }
}

// =============================================================================
// Helpers
// =============================================================================

const START_MS: i64 = 1_700_000_000_000;

fn config() -> SdkConfig {
    let mut config = SdkConfig::new("app", "https://collector.example.com");
    config.no_heartbeat = true;
    config.device_id = Some("device-1".into());
    config
}

fn marker(n: u32) -> Request {
    Request::new().with("n", n)
}

fn markers(requests: &[Request]) -> Vec<Value> {
    requests.iter().map(|r| r.get("n").cloned().unwrap_or(Value::Null)).collect()
}

// =============================================================================
// Network Chaos
// =============================================================================

#[tokio::test]
async fn test_flapping_network_loses_nothing() {
    let transport = FailingTransport::new(3, TransportError::Network("connection reset".into()));
    let clock = ManualClock::new(START_MS);
    let tracker = TrackerBuilder::new(config())
        .host_storage(Arc::new(MemoryBackend::new()))
        .transport(transport.clone())
        .clock(clock.clone())
        .build()
        .await
        .unwrap();

    for n in 1..=3 {
        tracker.enqueue_request(marker(n)).await;
    }

    let mut delivered = Vec::new();
    for _ in 0..20 {
        if let DeliveryAttempt::Delivered(request) = tracker.tick().await.delivery {
            delivered.push(request.get("n").cloned().unwrap());
        }
        clock.advance_secs(61);
    }

    assert_eq!(delivered, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(transport.calls(), 6);
    assert!(tracker.get_queues().await.requests.is_empty());
}

#[tokio::test]
async fn test_permanent_outage_keeps_newest_requests() {
    let mut cfg = config();
    cfg.queue_size = 3;
    let transport = FailingTransport::new(u64::MAX, TransportError::Timeout);
    let clock = ManualClock::new(START_MS);
    let tracker = TrackerBuilder::new(cfg)
        .host_storage(Arc::new(MemoryBackend::new()))
        .transport(transport.clone())
        .clock(clock.clone())
        .build()
        .await
        .unwrap();

    for n in 1..=10 {
        tracker.enqueue_request(marker(n)).await;
        tracker.tick().await;
        clock.advance_secs(61);
    }

    let queued = tracker.get_queues().await.requests;
    assert_eq!(markers(&queued), vec![json!(8), json!(9), json!(10)]);
    assert_eq!(transport.calls(), 10);
    assert!(tracker.health().warning_count >= 7);
}

#[tokio::test]
async fn test_backoff_blocks_until_window_passes() {
    let transport = FailingTransport::new(1, TransportError::Timeout);
    let clock = ManualClock::new(START_MS);
    let tracker = TrackerBuilder::new(config())
        .host_storage(Arc::new(MemoryBackend::new()))
        .transport(transport.clone())
        .clock(clock.clone())
        .build()
        .await
        .unwrap();
    tracker.enqueue_request(marker(1)).await;

    assert!(matches!(tracker.tick().await.delivery, DeliveryAttempt::Failed { .. }));
    for _ in 0..5 {
        clock.advance_secs(10);
        tracker.tick().await;
    }
    assert_eq!(transport.calls(), 1);

    // 60s exactly is still inside the window
    clock.set(START_MS + 60_000);
    assert_eq!(tracker.tick().await.delivery, DeliveryAttempt::Skipped(SkipReason::BackingOff));
    clock.set(START_MS + 60_001);
    assert!(tracker.tick().await.delivered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_delivery_in_flight() {
    let transport = Arc::new(StallingTransport::default());
    let tracker = TrackerBuilder::new(config())
        .host_storage(Arc::new(MemoryBackend::new()))
        .transport(transport.clone())
        .clock(ManualClock::new(START_MS))
        .build()
        .await
        .unwrap();
    tracker.enqueue_request(marker(1)).await;

    let background = tracker.clone();
    let first = tokio::spawn(async move { background.tick().await });
    transport.entered.notified().await;

    // The state lock is free while the request is on the wire
    assert!(tracker.enqueue_request(marker(2)).await.is_queued());
    assert_eq!(tracker.tick().await.delivery, DeliveryAttempt::Skipped(SkipReason::InFlight));

    transport.release.notify_one();
    let report = first.await.unwrap();
    assert!(report.delivered());

    let queued = tracker.get_queues().await.requests;
    assert_eq!(markers(&queued), vec![json!(2)]);
    assert_eq!(transport.seen.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_never_exceed_bound() {
    let mut cfg = config();
    cfg.queue_size = 50;
    let tracker = TrackerBuilder::new(cfg)
        .host_storage(Arc::new(MemoryBackend::new()))
        .transport(FailingTransport::new(u64::MAX, TransportError::Timeout))
        .build()
        .await
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..40u32 {
                tracker.enqueue_request(marker(worker * 100 + n)).await;
                tracker.enqueue_event(EventInput::new("tap")).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let queues = tracker.get_queues().await;
    assert_eq!(queues.requests.len(), 50);
    assert_eq!(queues.events.len(), 160);
}

// =============================================================================
// Storage Chaos
// =============================================================================

#[tokio::test]
async fn test_failing_writes_do_not_block_delivery() {
    let storage = FailingStorage::new();
    let transport = FailingTransport::new(0, TransportError::Timeout);
    let tracker = TrackerBuilder::new(config())
        .host_storage(storage.clone())
        .transport(transport.clone())
        .clock(ManualClock::new(START_MS))
        .build()
        .await
        .unwrap();

    storage.fail_writes.store(true, Ordering::SeqCst);
    let attempts_before = storage.write_attempts.load(Ordering::SeqCst);

    assert!(tracker.enqueue_request(marker(1)).await.is_queued());
    assert!(storage.write_attempts.load(Ordering::SeqCst) > attempts_before);
    assert!(tracker.tick().await.delivered());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_unreadable_storage_starts_fresh() {
    let storage = FailingStorage::new();
    storage
        .inner
        .set_item("app/cly_queue", r#"[{"n":1,"app_key":"app","device_id":"x"}]"#)
        .await
        .unwrap();
    storage.fail_reads.store(true, Ordering::SeqCst);

    let mut cfg = config();
    cfg.device_id = None;
    let tracker = TrackerBuilder::new(cfg)
        .host_storage(storage.clone())
        .transport(FailingTransport::new(0, TransportError::Timeout))
        .build()
        .await
        .unwrap();

    assert!(tracker.get_queues().await.requests.is_empty());
    assert_eq!(tracker.device_id_type().await, DeviceIdType::SdkGenerated);
}

#[tokio::test]
async fn test_corrupted_queues_load_empty() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_item("app/cly_queue", "{not json").await.unwrap();
    backend.set_item("app/cly_event", r#"{"key":"not a list"}"#).await.unwrap();
    backend.set_item("app/cly_remote_configs", "[1,2,3]").await.unwrap();

    let tracker = TrackerBuilder::new(config())
        .host_storage(backend.clone())
        .transport(FailingTransport::new(0, TransportError::Timeout))
        .build()
        .await
        .unwrap();

    let queues = tracker.get_queues().await;
    assert!(queues.requests.is_empty());
    assert!(queues.events.is_empty());
    assert!(tracker.remote_config().await.is_empty());

    // And the tracker still works
    assert!(tracker.enqueue_event(EventInput::new("after")).await);
    assert_eq!(tracker.tick().await.events_flushed, 1);
}

#[tokio::test]
async fn test_storage_disabled_runs_in_memory() {
    let mut cfg = config();
    cfg.storage = beacon_sdk::StorageChoice::None;
    let transport = FailingTransport::new(0, TransportError::Timeout);
    let tracker = TrackerBuilder::new(cfg)
        .transport(transport.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(tracker.storage_backend(), "none");
    tracker.enqueue_request(marker(1)).await;
    assert!(tracker.tick().await.delivered());
}

#[tokio::test]
async fn test_sqlite_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("beacon.db").to_string_lossy().to_string();

    let mut cfg = config();
    cfg.native_storage_path = Some(path.clone());

    {
        let tracker = TrackerBuilder::new(cfg.clone())
            .transport(FailingTransport::new(u64::MAX, TransportError::Timeout))
            .build()
            .await
            .unwrap();
        assert_eq!(tracker.storage_backend(), "sqlite");
        tracker.enqueue_request(marker(1)).await;
        tracker.enqueue_request(marker(2)).await;
    }

    let restarted = TrackerBuilder::new(cfg)
        .transport(FailingTransport::new(0, TransportError::Timeout))
        .build()
        .await
        .unwrap();
    let queued = restarted.get_queues().await.requests;
    assert_eq!(markers(&queued), vec![json!(1), json!(2)]);
    assert!(restarted.tick().await.delivered());
}

#[tokio::test]
async fn test_legacy_keys_migrated_on_build() {
    let backend = Arc::new(MemoryBackend::new());
    backend.set_item("cly_id", "legacy-device").await.unwrap();
    backend.set_item("cly_id_type", "1").await.unwrap();
    backend
        .set_item(
            "cly_queue",
            r#"[{"n":1,"app_key":"app"},{"n":2,"app_key":"other"}]"#,
        )
        .await
        .unwrap();

    let mut cfg = config();
    cfg.device_id = None;
    let tracker = TrackerBuilder::new(cfg)
        .host_storage(backend.clone())
        .transport(FailingTransport::new(0, TransportError::Timeout))
        .build()
        .await
        .unwrap();

    assert_eq!(tracker.device_id().await, "legacy-device");
    assert_eq!(tracker.device_id_type().await, DeviceIdType::SdkGenerated);
    assert_eq!(markers(&tracker.get_queues().await.requests), vec![json!(1)]);
    assert!(backend.get_item("cly_id").await.unwrap().is_none());
}
