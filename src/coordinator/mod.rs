// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-app-key tracker.
//!
//! A [`Tracker`] owns one app key's event buffer, request buffer, backoff
//! state and health counters, and drives them from a heartbeat loop.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized → Idle ⇄ Ticking
//!       ▲                  │
//!       └──── reset() ─────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_sdk::{EventInput, Lifecycle, SdkConfig, TrackerBuilder};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SdkConfig::new("YOUR_APP_KEY", "https://analytics.example.com");
//! let tracker = TrackerBuilder::new(config).build().await.expect("build failed");
//!
//! assert_eq!(tracker.lifecycle(), Lifecycle::Idle);
//! tracker.enqueue_event(EventInput::new("purchase").sum(9.99)).await;
//! # }
//! ```

mod types;
mod api;
mod commands;
mod heartbeat;
mod identity;
mod reconcile;
mod remote;
mod session;

pub use commands::{Command, CommandAction, CommandQueue};
pub use types::{DeliveryAttempt, Lifecycle, QueueSnapshot, SkipReason, TickReport};

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::{EnqueueOutcome, EventBuffer, EventStamp, Envelope, RejectReason, RequestBuffer};
use crate::clock::{hour_and_dow, MonotonicStamp, SystemClock, WallClock};
use crate::config::{ConfigError, SdkConfig};
use crate::health::{HealthCounters, HealthSnapshot};
use crate::record::{DeviceIdType, Request};
use crate::resilience::backoff::Backoff;
use crate::serializer::{JsonSerializer, Serializer};
use crate::storage::{self, keys, KvStore, StorageBackend};
use crate::sync::Registry;
use crate::transport::{self, Dispatcher, Transport};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("transport unavailable: {0}")]
    Transport(String),
}

/// Mutable per-tracker state, guarded by one async mutex.
#[derive(Debug)]
pub(crate) struct TrackerState {
    pub(crate) events: EventBuffer,
    pub(crate) requests: RequestBuffer,
    pub(crate) backoff: Backoff,
    pub(crate) device_id: String,
    pub(crate) device_id_type: DeviceIdType,
    pub(crate) offline: bool,
    pub(crate) opted_out: bool,
    pub(crate) session_started: bool,
    /// Seconds; last time session time was reported
    pub(crate) last_beat_secs: i64,
    pub(crate) remote_config: Map<String, Value>,
    pub(crate) current_view_id: Option<String>,
    pub(crate) previous_view_id: Option<String>,
    /// A health check was requested while offline
    pub(crate) pending_health_check: bool,
}

pub(crate) struct TrackerInner {
    pub(crate) config: SdkConfig,

    /// Namespaced storage for this app key
    pub(crate) store: KvStore,

    pub(crate) dispatcher: Dispatcher,

    pub(crate) clock: Arc<dyn WallClock>,

    /// Strictly increasing millisecond stamps for requests and events
    pub(crate) stamps: MonotonicStamp,

    pub(crate) health: HealthCounters,

    pub(crate) state: Mutex<TrackerState>,

    /// Set while a queue delivery is outstanding
    pub(crate) in_flight: AtomicBool,

    pub(crate) lifecycle: watch::Sender<Lifecycle>,

    pub(crate) registry: Weak<Registry>,

    pub(crate) heartbeat: parking_lot::Mutex<Option<JoinHandle<()>>>,

    /// Construction time, for crash `_run`
    pub(crate) started_at_ms: i64,
}

/// Handle to one tracker. Cheap to clone.
#[derive(Clone)]
pub struct Tracker {
    pub(crate) inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("app_key", &self.inner.config.app_key)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Builds a [`Tracker`] from an [`SdkConfig`].
///
/// Every collaborator has a default: storage comes from
/// [`storage::select_backend`], the transport from the config, the clock is
/// the system clock and the serializer is JSON.
pub struct TrackerBuilder {
    config: SdkConfig,
    host_storage: Option<Arc<dyn StorageBackend>>,
    transport: Option<Arc<dyn Transport>>,
    serializer: Arc<dyn Serializer>,
    clock: Arc<dyn WallClock>,
    registry: Option<Arc<Registry>>,
}

impl TrackerBuilder {
    #[must_use]
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            host_storage: None,
            transport: None,
            serializer: Arc::new(JsonSerializer),
            clock: Arc::new(SystemClock),
            registry: None,
        }
    }

    /// Use a host-provided backend instead of the built-in ones.
    #[must_use]
    pub fn host_storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.host_storage = Some(backend);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register the tracker and share the registry's storage channel.
    #[must_use]
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the tracker, restore persisted state and start the heartbeat.
    ///
    /// Startup order:
    /// 1. Validate the config and pick a storage backend
    /// 2. Copy legacy unnamespaced keys
    /// 3. Load health counters, both queues, opt-out flag and remote config
    /// 4. Resolve the device id
    /// 5. Register with the registry and start the heartbeat
    #[tracing::instrument(skip(self), fields(app_key = %self.config.app_key))]
    pub async fn build(self) -> Result<Tracker, BuildError> {
        let config = self.config;
        config.validate()?;

        let backend = storage::select_backend(&config, self.host_storage, self.clock.clone()).await;
        let mut store = KvStore::new(backend, self.serializer, &config.namespace, &config.app_key);
        if let Some(ref registry) = self.registry {
            store = store.with_channel(registry.channel().clone(), registry.context());
        }

        let migrated = store.migrate_legacy(&config.app_key).await;
        if migrated > 0 {
            info!(migrated, "copied legacy storage keys");
        }

        let transport = match self.transport {
            Some(t) => t,
            None => transport::from_config(&config).map_err(|e| BuildError::Transport(e.to_string()))?,
        };
        let dispatcher = Dispatcher::new(transport, &config);

        let health = HealthCounters::new();
        health.load(&store).await;

        let events = EventBuffer::load(&store).await;
        let requests = RequestBuffer::load(&store, config.queue_size).await;
        let opted_out = config.ignore_visitor
            || matches!(store.get(keys::IGNORE).await, Some(Value::Bool(true)));
        let remote_config = match store.get(keys::REMOTE_CONFIGS).await {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let state = TrackerState {
            events,
            requests,
            backoff: Backoff::new(Duration::from_secs(config.fail_timeout_secs)),
            device_id: String::new(),
            device_id_type: DeviceIdType::SdkGenerated,
            offline: false,
            opted_out,
            session_started: false,
            last_beat_secs: 0,
            remote_config,
            current_view_id: None,
            previous_view_id: None,
            pending_health_check: false,
        };

        let (lifecycle, _) = watch::channel(Lifecycle::Uninitialized);
        let started_at_ms = self.clock.now_ms();
        let tracker = Tracker {
            inner: Arc::new(TrackerInner {
                config,
                store,
                dispatcher,
                clock: self.clock,
                stamps: MonotonicStamp::new(),
                health,
                state: Mutex::new(state),
                in_flight: AtomicBool::new(false),
                lifecycle,
                registry: self.registry.as_ref().map(Arc::downgrade).unwrap_or_default(),
                heartbeat: parking_lot::Mutex::new(None),
                started_at_ms,
            }),
        };

        {
            let mut state = tracker.inner.state.lock().await;
            tracker.resolve_identity(&mut state).await;
            info!(
                device_id_type = %state.device_id_type,
                offline = state.offline,
                queued_requests = state.requests.len(),
                queued_events = state.events.len(),
                storage = tracker.inner.store.backend_name(),
                transport = tracker.inner.dispatcher.transport_name(),
                "tracker ready"
            );
        }

        tracker.inner.lifecycle.send_replace(Lifecycle::Idle);

        if let Some(registry) = self.registry {
            registry.register(tracker.clone());
        }
        if !tracker.inner.config.no_heartbeat {
            tracker.start();
        }
        Ok(tracker)
    }
}

impl Tracker {
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.inner.config.app_key
    }

    #[must_use]
    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle.borrow()
    }

    /// Watch lifecycle changes.
    #[must_use]
    pub fn lifecycle_receiver(&self) -> watch::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        self.inner.health.snapshot()
    }

    /// Name of the storage backend in use.
    #[must_use]
    pub fn storage_backend(&self) -> &'static str {
        self.inner.store.backend_name()
    }

    pub async fn device_id(&self) -> String {
        self.inner.state.lock().await.device_id.clone()
    }

    pub async fn device_id_type(&self) -> DeviceIdType {
        self.inner.state.lock().await.device_id_type
    }

    pub async fn is_offline(&self) -> bool {
        self.inner.state.lock().await.offline
    }

    pub async fn is_opted_out(&self) -> bool {
        self.inner.state.lock().await.opted_out
    }

    pub async fn session_started(&self) -> bool {
        self.inner.state.lock().await.session_started
    }

    /// Epoch ms before which queue delivery is suppressed.
    pub async fn backoff_until(&self) -> i64 {
        self.inner.state.lock().await.backoff.until_ms()
    }

    /// Context stamped onto every request enqueued now.
    pub(crate) fn envelope(&self, state: &TrackerState) -> Envelope {
        let config = &self.inner.config;
        let timestamp = self.inner.stamps.next(self.inner.clock.now_ms());
        let (hour, dow) = hour_and_dow(timestamp);
        Envelope {
            app_key: config.app_key.clone(),
            device_id: state.device_id.clone(),
            device_id_type: Some(state.device_id_type),
            sdk_name: config.sdk_name.clone(),
            sdk_version: config.sdk_version.clone(),
            app_version: config.app_version.clone(),
            user_agent: config.user_agent.clone(),
            track_location: config.track_location,
            country_code: config.country_code.clone(),
            city: config.city.clone(),
            ip_address: config.ip_address.clone(),
            timestamp,
            hour,
            dow,
            opted_out: state.opted_out,
        }
    }

    pub(crate) fn event_stamp(&self, state: &TrackerState) -> EventStamp {
        let now = self.inner.clock.now_ms();
        let timestamp = self.inner.stamps.next(now);
        let (hour, dow) = hour_and_dow(timestamp);
        EventStamp {
            timestamp,
            hour,
            dow,
            id: crate::record::secure_random(now),
            cvid: state.current_view_id.clone(),
            pvid: state.previous_view_id.clone(),
        }
    }

    /// `metrics` parameter for session and crash requests.
    pub(crate) fn metrics_param(&self) -> String {
        let mut metrics = Map::new();
        metrics.insert(
            "_app_version".to_string(),
            Value::String(self.inner.config.app_version.clone()),
        );
        Value::Object(metrics).to_string()
    }

    /// Enqueue with the state lock already held.
    pub(crate) async fn enqueue_locked(&self, state: &mut TrackerState, request: Request) -> EnqueueOutcome {
        let envelope = self.envelope(state);
        let outcome = state.requests.enqueue(request, &envelope, &self.inner.store).await;
        let app_key = self.app_key();
        match outcome {
            EnqueueOutcome::Queued { depth } => {
                crate::metrics::record_enqueue(app_key, "queued");
                crate::metrics::set_request_queue_depth(app_key, depth);
            }
            EnqueueOutcome::Evicted { depth, .. } => {
                self.inner.health.record_warning();
                crate::metrics::record_enqueue(app_key, "evicted");
                crate::metrics::set_request_queue_depth(app_key, depth);
            }
            EnqueueOutcome::Rejected(RejectReason::OptedOut) => {
                debug!("request dropped, opted out");
                crate::metrics::record_enqueue(app_key, "rejected");
            }
            EnqueueOutcome::Rejected(_) => {
                self.inner.health.record_error();
                crate::metrics::record_enqueue(app_key, "rejected");
            }
        }
        outcome
    }

    /// Fold pending events into one `events` request. With `all` the batch
    /// limit is ignored.
    pub(crate) async fn flush_events_locked(&self, state: &mut TrackerState, all: bool) -> usize {
        let store = &self.inner.store;
        let batch = if all {
            state.events.force_drain_all(store).await
        } else {
            state.events.drain_batch(self.inner.config.max_events, store).await
        };
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match serde_json::to_string(&batch) {
            Ok(events) => {
                self.enqueue_locked(state, Request::new().with("events", events)).await;
            }
            Err(e) => self.log_error(&format!("failed to encode event batch: {e}")),
        }
        crate::metrics::record_event_batch(self.app_key(), count);
        crate::metrics::set_event_queue_depth(self.app_key(), state.events.len());
        count
    }

    pub(crate) fn log_error(&self, message: &str) {
        self.inner.health.record_error();
        error!(app_key = %self.app_key(), "{}", message);
    }

    pub(crate) fn log_warn(&self, message: &str) {
        self.inner.health.record_warning();
        warn!(app_key = %self.app_key(), "{}", message);
    }
}
