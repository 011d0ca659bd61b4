//! # Beacon SDK
//!
//! Queued, persistent delivery of analytics events and requests to a
//! collection server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Producer API                          │
//! │  • enqueue_event / enqueue_request / sessions / identity   │
//! │  • Registry command queue for calls made before init       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Event Buffer → Request Buffer               │
//! │  • Events truncated, stamped, batched into one request     │
//! │  • Requests bounded FIFO, oldest dropped on overflow       │
//! │  • Both persisted through the KvStore on every mutation    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (Heartbeat, one delivery at a time)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                           │
//! │  • GET or POST, optional SHA-256 checksum                  │
//! │  • Response validation, backoff on failure                 │
//! │  • Health counters for self-reporting                      │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   KvStore writes ──► StorageChannel ──► SyncListener (other contexts)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beacon_sdk::{EventInput, SdkConfig, TrackerBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut config = SdkConfig::new("YOUR_APP_KEY", "https://analytics.example.com");
//!     config.native_storage_path = Some("./beacon.db".into());
//!
//!     let tracker = TrackerBuilder::new(config).build().await.expect("Failed to build");
//!
//!     tracker.begin_session(false).await;
//!     tracker
//!         .enqueue_event(EventInput::new("purchase").count(1).sum(9.99))
//!         .await;
//!
//!     // The heartbeat flushes and delivers in the background.
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     tracker.end_session(None, false).await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`Tracker`], its heartbeat and producer API
//! - [`buffer`]: Event and request queues, truncation limits
//! - [`transport`]: HTTP transports and the [`Dispatcher`](transport::Dispatcher)
//! - [`storage`]: Key-value backends (sqlite, cookie jar, memory) and [`KvStore`](storage::KvStore)
//! - [`sync`]: Registry, storage-change channel and cross-context listener
//! - [`resilience`]: Delivery backoff and startup retry

pub mod config;
pub mod clock;
pub mod serializer;
pub mod record;
pub mod storage;
pub mod buffer;
pub mod resilience;
pub mod health;
pub mod transport;
pub mod sync;
pub mod coordinator;
pub mod metrics;

pub use config::{ConfigError, SdkConfig, StorageChoice, TransportKind};
pub use clock::{ManualClock, SystemClock, WallClock};
pub use serializer::{JsonSerializer, Serializer};
pub use record::{DeviceIdType, EventInput, EventRecord, Request, TEMP_DEVICE_ID};
pub use storage::{KvStore, StorageBackend, StorageError};
pub use buffer::{EnqueueOutcome, Limits, RejectReason};
pub use health::HealthSnapshot;
pub use transport::{DispatchFailure, HttpRequest, HttpResponse, Method, Transport, TransportError};
pub use sync::{Registry, StorageChannel, SyncListener};
pub use coordinator::{
    BuildError, Command, CommandAction, DeliveryAttempt, Lifecycle, QueueSnapshot, SkipReason, TickReport, Tracker,
    TrackerBuilder,
};
pub use resilience::retry::RetryConfig;
pub use metrics::DispatchTimer;
