//! Requests that bypass the queue: remote config and health checks.

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::Tracker;
use crate::record::Request;
use crate::storage::keys;
use crate::transport::ResponseShape;

/// Dispatch name of the health-check request.
pub const HEALTH_CHECK_DISPATCH: &str = "[healthCheck]";

impl Tracker {
    /// Fetch remote config values and update the cache.
    ///
    /// With `keys` or `omit_keys` the response is merged into the cache,
    /// otherwise it replaces it. Returns the cache after the update, or
    /// `None` if the fetch failed.
    #[tracing::instrument(skip(self), fields(app_key = %self.app_key()))]
    pub async fn fetch_remote_config(
        &self,
        keys: Option<Vec<String>>,
        omit_keys: Option<Vec<String>>,
    ) -> Option<Map<String, Value>> {
        let config = &self.inner.config;
        let params = {
            let state = self.inner.state.lock().await;
            if state.opted_out {
                return None;
            }
            let mut request = Request::new()
                .with("method", "rc")
                .with("av", config.app_version.as_str());
            if let Some(keys) = keys.filter(|k| !k.is_empty()) {
                request.insert("keys", Value::from(keys).to_string());
            } else if let Some(omit) = omit_keys.filter(|k| !k.is_empty()) {
                request.insert("omit_keys", Value::from(omit).to_string());
            }
            self.envelope(&state).apply(&mut request);
            request
        };
        let merge = params.contains("keys") || params.contains("omit_keys");

        let url = format!("{}/o/sdk", config.base_url());
        let report = self
            .inner
            .dispatcher
            .send("fetch_remote_config", &url, params, ResponseShape::ObjectOrArray)
            .await;
        if let Err(ref e) = report.result {
            self.log_error(&format!("fetch_remote_config failed: {e}"));
            return None;
        }
        let fetched = match report.json() {
            Some(Value::Object(map)) => map,
            _ => {
                debug!("remote config response is not an object, cache unchanged");
                return None;
            }
        };

        let mut state = self.inner.state.lock().await;
        if merge {
            state.remote_config.extend(fetched);
        } else {
            state.remote_config = fetched;
        }
        self.inner
            .store
            .set(keys::REMOTE_CONFIGS, &Value::Object(state.remote_config.clone()))
            .await;
        info!(entries = state.remote_config.len(), merge, "remote config updated");
        Some(state.remote_config.clone())
    }

    /// Cached remote config value for `key`.
    pub async fn get_remote_config(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().await.remote_config.get(key).cloned()
    }

    /// The whole cached remote config.
    pub async fn remote_config(&self) -> Map<String, Value> {
        self.inner.state.lock().await.remote_config.clone()
    }

    /// Report the health counters directly to the server.
    ///
    /// Offline, the report is deferred until offline mode is left. Returns
    /// whether the report was delivered.
    #[tracing::instrument(skip(self), fields(app_key = %self.app_key()))]
    pub async fn send_health_check(&self) -> bool {
        let config = &self.inner.config;
        let health = &self.inner.health;
        let params = {
            let mut state = self.inner.state.lock().await;
            if state.offline {
                debug!("offline, health check deferred");
                state.pending_health_check = true;
                return false;
            }
            let mut request = Request::new()
                .with("hc", health.to_param())
                .with("metrics", self.metrics_param());
            self.envelope(&state).apply(&mut request);
            request
        };

        let url = format!("{}/i", config.base_url());
        let report = self
            .inner
            .dispatcher
            .send(HEALTH_CHECK_DISPATCH, &url, params, ResponseShape::ObjectOrArray)
            .await;
        if report.is_error() {
            return false;
        }
        health.reset();
        health.persist(&self.inner.store).await;
        true
    }
}
