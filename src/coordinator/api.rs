//! Producer-facing operations: events, raw requests, privacy, users, crashes.

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::types::{Lifecycle, QueueSnapshot};
use super::Tracker;
use crate::buffer::truncate::{truncate_segmentation, truncate_value};
use crate::buffer::EnqueueOutcome;
use crate::record::{secure_random, EventInput, Request, VIEW_EVENT_KEY};
use crate::storage::keys;

/// Fields kept from a `user_details` payload.
const USER_DETAIL_FIELDS: [&str; 9] = [
    "name",
    "username",
    "email",
    "organization",
    "phone",
    "picture",
    "gender",
    "byear",
    "custom",
];

const MAX_PICTURE_URL_LEN: usize = 4096;

impl Tracker {
    /// Buffer an analytic event. Returns `false` if it was dropped.
    pub async fn enqueue_event(&self, event: EventInput) -> bool {
        let limits = self.inner.config.limits();
        let mut state = self.inner.state.lock().await;
        if state.opted_out {
            debug!(key = %event.key, "event dropped, opted out");
            return false;
        }
        let stamp = self.event_stamp(&state);
        let added = state.events.append(event, stamp, &limits, &self.inner.store).await;
        if added {
            crate::metrics::set_event_queue_depth(self.app_key(), state.events.len());
        } else {
            self.inner.health.record_error();
        }
        added
    }

    /// Stamp and queue a request built by the host.
    pub async fn enqueue_request(&self, request: Request) -> EnqueueOutcome {
        let mut state = self.inner.state.lock().await;
        self.enqueue_locked(&mut state, request).await
    }

    /// Move every buffered event into the request queue now, ignoring the
    /// batch limit.
    pub async fn force_flush_events(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        self.flush_events_locked(&mut state, true).await
    }

    pub async fn get_queues(&self) -> QueueSnapshot {
        let state = self.inner.state.lock().await;
        QueueSnapshot {
            events: state.events.as_slice().to_vec(),
            requests: state.requests.to_vec(),
        }
    }

    /// Empty both queues and their persisted copies.
    pub async fn clear_queues(&self) {
        let mut state = self.inner.state.lock().await;
        state.events.clear(&self.inner.store).await;
        state.requests.clear(&self.inner.store).await;
        crate::metrics::set_request_queue_depth(self.app_key(), 0);
        crate::metrics::set_event_queue_depth(self.app_key(), 0);
    }

    pub async fn opt_out(&self) {
        let mut state = self.inner.state.lock().await;
        state.opted_out = true;
        self.inner.store.set(keys::IGNORE, &Value::Bool(true)).await;
        info!(app_key = %self.app_key(), "opted out");
    }

    pub async fn opt_in(&self) {
        let mut state = self.inner.state.lock().await;
        state.opted_out = false;
        self.inner.store.set(keys::IGNORE, &Value::Bool(false)).await;
        info!(app_key = %self.app_key(), "opted in");
    }

    /// Record a view event and move the view-id chain forward.
    pub async fn begin_view(&self, name: &str) -> bool {
        let limits = self.inner.config.limits();
        let mut state = self.inner.state.lock().await;
        if state.opted_out {
            return false;
        }

        let view_id = secure_random(self.inner.clock.now_ms());
        let mut stamp = self.event_stamp(&state);
        stamp.id = view_id.clone();
        stamp.cvid = None;
        stamp.pvid = state.current_view_id.clone();

        let event = EventInput::new(VIEW_EVENT_KEY)
            .segment("name", name)
            .segment("visit", 1);
        if !state.events.append(event, stamp, &limits, &self.inner.store).await {
            return false;
        }
        state.previous_view_id = state.current_view_id.replace(view_id);
        true
    }

    /// Queue a `user_details` request. Buffered events go out first so they
    /// are attributed to the user as they were.
    pub async fn user_details(&self, details: Value) -> EnqueueOutcome {
        // Commands queued earlier go out first
        self.drain_commands().await;
        let limits = self.inner.config.limits();
        let mut state = self.inner.state.lock().await;
        self.flush_events_locked(&mut state, true).await;

        let mut user = Map::new();
        if let Value::Object(fields) = details {
            for field in USER_DETAIL_FIELDS {
                let Some(value) = fields.get(field) else { continue };
                let value = match (field, value) {
                    ("custom", Value::Object(custom)) => {
                        Value::Object(truncate_segmentation(custom, &limits, "user_details"))
                    }
                    ("picture", v) => truncate_value(v, MAX_PICTURE_URL_LEN, "user_details"),
                    (_, v) => truncate_value(v, limits.max_value_size, "user_details"),
                };
                user.insert(field.to_string(), value);
            }
        }

        let request = Request::new().with("user_details", Value::Object(user).to_string());
        self.enqueue_locked(&mut state, request).await
    }

    /// Queue a crash report. Does nothing unless crash tracking is on.
    pub async fn record_error(
        &self,
        message: &str,
        nonfatal: bool,
        segments: Option<Map<String, Value>>,
    ) -> bool {
        let config = &self.inner.config;
        if !config.tracking_crashes {
            debug!("crash tracking disabled, error not recorded");
            return false;
        }
        if message.is_empty() {
            self.log_warn("record_error called with an empty message");
            return false;
        }

        let run_secs = (self.inner.clock.now_ms() - self.inner.started_at_ms).max(0) / 1000;
        let mut crash = Map::new();
        crash.insert("_error".to_string(), Value::String(message.to_string()));
        crash.insert("_app_version".to_string(), Value::String(config.app_version.clone()));
        crash.insert("_run".to_string(), Value::from(run_secs));
        crash.insert("_not_os_specific".to_string(), Value::Bool(true));
        crash.insert("_nonfatal".to_string(), Value::Bool(nonfatal));
        if let Some(ref segments) = segments {
            crash.insert(
                "_custom".to_string(),
                Value::Object(truncate_segmentation(segments, &config.limits(), "record_error")),
            );
        }

        let request = Request::new()
            .with("crash", Value::Object(crash).to_string())
            .with("metrics", self.metrics_param());
        let mut state = self.inner.state.lock().await;
        self.enqueue_locked(&mut state, request).await.is_queued()
    }

    /// Queue a campaign attribution. Missing values come from storage.
    pub async fn record_campaign(&self, campaign_id: Option<&str>, campaign_user: Option<&str>) -> EnqueueOutcome {
        let store = &self.inner.store;
        let campaign_id = match campaign_id.filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => store
                .get(keys::CAMPAIGN_ID)
                .await
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "cly_organic".to_string()),
        };
        let campaign_user = match campaign_user.filter(|s| !s.is_empty()) {
            Some(user) => Some(user.to_string()),
            None => store
                .get(keys::CAMPAIGN_USER)
                .await
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty()),
        };

        let mut request = Request::new().with("campaign_id", campaign_id);
        if let Some(user) = campaign_user {
            request.insert("campaign_user", user);
        }
        let mut state = self.inner.state.lock().await;
        self.enqueue_locked(&mut state, request).await
    }

    /// Persist an auth token for the next push registration.
    pub async fn store_token(&self, token: &Value) {
        self.inner.store.set(keys::TOKEN, token).await;
        self.inner.store.set(keys::OLD_TOKEN, token).await;
    }

    /// Read and clear the stored token.
    pub async fn take_token(&self) -> Option<Value> {
        let token = self.inner.store.get(keys::TOKEN).await;
        if token.is_some() {
            self.inner.store.remove(keys::TOKEN).await;
        }
        token
    }

    /// Tear the tracker down to a blank state.
    ///
    /// Stops the heartbeat, wipes buffers, persisted keys and health counters,
    /// and leaves the registry. A reset tracker rejects every request until
    /// it is rebuilt.
    pub async fn reset(&self) {
        self.stop();
        let store = &self.inner.store;
        {
            let mut state = self.inner.state.lock().await;
            state.events.clear(store).await;
            state.requests.clear(store).await;
            for key in keys::MIGRATED {
                store.remove(key).await;
            }
            for key in [
                keys::OLD_TOKEN,
                keys::HC_ERROR_COUNT,
                keys::HC_WARNING_COUNT,
                keys::HC_STATUS_CODE,
                keys::HC_ERROR_MESSAGE,
            ] {
                store.remove(key).await;
            }

            state.backoff.reset();
            state.device_id.clear();
            state.offline = false;
            state.opted_out = false;
            state.session_started = false;
            state.last_beat_secs = 0;
            state.remote_config.clear();
            state.current_view_id = None;
            state.previous_view_id = None;
            state.pending_health_check = false;
        }
        self.inner.health.reset();

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.unregister(self.app_key());
        }
        self.inner.lifecycle.send_replace(Lifecycle::Uninitialized);
        info!(app_key = %self.app_key(), "tracker reset");
    }
}
