// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session begin, duration updates and end.
//!
//! Session times are in seconds. The `cly_session` key holds the expiry of
//! the session cookie; a session only restarts once it has passed.

use serde_json::Value;
use tracing::debug;

use super::{Tracker, TrackerState};
use crate::record::Request;
use crate::storage::keys;

impl Tracker {
    pub async fn begin_session(&self, force: bool) {
        let mut state = self.inner.state.lock().await;
        self.begin_session_locked(&mut state, force).await;
    }

    /// Report `secs` of session time and extend the session.
    pub async fn session_duration(&self, secs: i64) {
        let mut state = self.inner.state.lock().await;
        self.session_duration_locked(&mut state, secs).await;
    }

    /// End the session. `secs` defaults to the time since the last beat.
    pub async fn end_session(&self, secs: Option<i64>, force: bool) {
        let mut state = self.inner.state.lock().await;
        self.end_session_locked(&mut state, secs, force).await;
    }

    async fn session_expiry(&self) -> Option<i64> {
        match self.inner.store.get(keys::SESSION).await? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    async fn refresh_session_expiry(&self, now_secs: i64) {
        let timeout_secs = self.inner.config.session_cookie_timeout_mins as i64 * 60;
        self.inner
            .store
            .set(keys::SESSION, &Value::from(now_secs + timeout_secs))
            .await;
    }

    pub(crate) async fn begin_session_locked(&self, state: &mut TrackerState, force: bool) {
        if state.session_started {
            debug!("session already started");
            return;
        }
        let now = self.inner.clock.now_secs();
        state.last_beat_secs = now;
        state.session_started = true;

        let expired = self.session_expiry().await.map_or(true, |expiry| expiry <= now);
        if force || !self.inner.config.use_session_cookie || expired {
            let request = Request::new()
                .with("begin_session", 1)
                .with("metrics", self.metrics_param());
            self.enqueue_locked(state, request).await;
        }
        self.refresh_session_expiry(now).await;
    }

    pub(crate) async fn session_duration_locked(&self, state: &mut TrackerState, secs: i64) {
        if !state.session_started {
            return;
        }
        self.enqueue_locked(state, Request::new().with("session_duration", secs)).await;
        self.extend_session_locked(state).await;
    }

    async fn extend_session_locked(&self, state: &mut TrackerState) {
        if !self.inner.config.use_session_cookie {
            return;
        }
        let now = self.inner.clock.now_secs();
        if self.session_expiry().await.map_or(true, |expiry| expiry <= now) {
            debug!("session cookie expired, starting a new session");
            state.session_started = false;
            self.begin_session_locked(state, false).await;
        }
        self.refresh_session_expiry(now).await;
    }

    pub(crate) async fn end_session_locked(&self, state: &mut TrackerState, secs: Option<i64>, force: bool) {
        if !state.session_started {
            return;
        }
        let secs = secs.unwrap_or_else(|| self.inner.clock.now_secs() - state.last_beat_secs);
        if !self.inner.config.use_session_cookie || force {
            let request = Request::new()
                .with("end_session", 1)
                .with("session_duration", secs);
            self.enqueue_locked(state, request).await;
        } else {
            self.session_duration_locked(state, secs).await;
        }
        state.session_started = false;
    }

    /// Heartbeat step: report session time once `session_update_secs` has
    /// passed since the last beat. Returns whether an update was emitted.
    pub(crate) async fn auto_extend_locked(&self, state: &mut TrackerState) -> bool {
        let config = &self.inner.config;
        if !state.session_started || !config.auto_extend {
            return false;
        }
        let now = self.inner.clock.now_secs();
        let elapsed = now - state.last_beat_secs;
        if elapsed <= config.session_update_secs as i64 {
            return false;
        }

        self.session_duration_locked(state, elapsed).await;
        state.last_beat_secs = now;

        let health = self.inner.health.snapshot();
        if health.error_count > 0 || health.warning_count > 0 {
            self.inner.health.persist(&self.inner.store).await;
        }
        true
    }
}
