// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Device identity: initial resolution, id changes and offline mode.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Tracker, TrackerState};
use crate::record::{generate_uuid, param_text, DeviceIdType, Request, TEMP_DEVICE_ID};
use crate::storage::keys;

fn non_empty(id: &Option<String>) -> Option<String> {
    id.clone().filter(|s| !s.is_empty())
}

impl Tracker {
    /// Pick the device id at build time.
    ///
    /// Priority: stored id (unless it is the temp placeholder), URL-provided
    /// id, configured id, temp id when offline, generated UUID.
    pub(crate) async fn resolve_identity(&self, state: &mut TrackerState) {
        let config = &self.inner.config;
        let store = &self.inner.store;

        if config.clear_stored_id {
            if let Some(old) = self.stored_device_id().await.filter(|id| id != TEMP_DEVICE_ID) {
                // Events buffered under the old id leave with it
                state.device_id = old;
                state.device_id_type = self.stored_device_id_type().await.unwrap_or(DeviceIdType::DeveloperSupplied);
                self.flush_events_locked(state, true).await;
            }
            store.remove(keys::DEVICE_ID).await;
            store.remove(keys::DEVICE_ID_TYPE).await;
            info!("stored device id cleared");
        }

        let stored = self.stored_device_id().await;
        let temp_was_enabled = stored.as_deref() == Some(TEMP_DEVICE_ID);

        let (device_id, id_type) = if let Some(id) = stored.filter(|id| id != TEMP_DEVICE_ID) {
            let id_type = self.stored_device_id_type().await.unwrap_or(DeviceIdType::DeveloperSupplied);
            (id, id_type)
        } else if let Some(id) = non_empty(&config.url_device_id) {
            (id, DeviceIdType::UrlProvided)
        } else if let Some(id) = non_empty(&config.device_id) {
            (id, DeviceIdType::DeveloperSupplied)
        } else if config.offline_mode || temp_was_enabled {
            state.offline = true;
            (TEMP_DEVICE_ID.to_string(), DeviceIdType::TemporaryId)
        } else {
            (generate_uuid(), DeviceIdType::SdkGenerated)
        };

        debug!(device_id = %device_id, id_type = %id_type, "device id resolved");
        self.set_device_id_locked(state, device_id, id_type).await;
    }

    async fn stored_device_id(&self) -> Option<String> {
        self.inner
            .store
            .get(keys::DEVICE_ID)
            .await
            .map(|v| param_text(&v))
            .filter(|s| !s.is_empty())
    }

    async fn stored_device_id_type(&self) -> Option<DeviceIdType> {
        let value = self.inner.store.get(keys::DEVICE_ID_TYPE).await?;
        DeviceIdType::from_value(&value)
    }

    async fn set_device_id_locked(&self, state: &mut TrackerState, device_id: String, id_type: DeviceIdType) {
        self.inner.store.set(keys::DEVICE_ID, &Value::String(device_id.clone())).await;
        self.inner.store.set(keys::DEVICE_ID_TYPE, &id_type.into()).await;
        state.device_id = device_id;
        state.device_id_type = id_type;
    }

    /// Switch to a developer-supplied device id.
    ///
    /// With `merge` the server is asked to fold the old id's data into the
    /// new one. Without it the current session ends under the old id and a
    /// new one begins under the new id.
    #[tracing::instrument(skip(self), fields(app_key = %self.app_key()))]
    pub async fn change_id(&self, new_id: &str, merge: bool) {
        if new_id.is_empty() {
            self.log_warn("change_id called with an empty id");
            return;
        }
        if !merge {
            // Commands queued under the old id leave with it
            self.drain_commands().await;
        }

        let refetch = {
            let mut state = self.inner.state.lock().await;
            if state.offline {
                drop(state);
                self.disable_offline_mode(Some(new_id)).await;
                return;
            }
            if state.device_id == new_id {
                debug!("device id unchanged");
                return;
            }

            if !merge {
                self.flush_events_locked(&mut state, true).await;
                self.end_session_locked(&mut state, None, true).await;
            }

            let old_id = std::mem::take(&mut state.device_id);
            self.set_device_id_locked(&mut state, new_id.to_string(), DeviceIdType::DeveloperSupplied)
                .await;
            info!(merge, "device id changed");

            if merge {
                self.enqueue_locked(&mut state, Request::new().with("old_device_id", old_id))
                    .await;
            } else {
                self.begin_session_locked(&mut state, true).await;
            }

            if self.inner.config.remote_config {
                state.remote_config.clear();
                self.inner
                    .store
                    .set(keys::REMOTE_CONFIGS, &Value::Object(Default::default()))
                    .await;
                true
            } else {
                false
            }
        };

        if refetch {
            self.fetch_remote_config(None, None).await;
        }
    }

    /// Set a developer-supplied id, merging unless the current id was
    /// supplied by the developer too.
    pub async fn set_id(&self, new_id: &str) {
        let merge = self.device_id_type().await != DeviceIdType::DeveloperSupplied;
        self.change_id(new_id, merge).await;
    }

    /// Hold all delivery and queue requests under the temp placeholder id.
    pub async fn enable_offline_mode(&self) {
        let mut state = self.inner.state.lock().await;
        if state.offline {
            return;
        }
        state.offline = true;
        self.set_device_id_locked(&mut state, TEMP_DEVICE_ID.to_string(), DeviceIdType::TemporaryId)
            .await;
        info!(app_key = %self.app_key(), "offline mode enabled");
    }

    /// Leave offline mode and give queued placeholder requests a real id.
    pub async fn disable_offline_mode(&self, device_id: Option<&str>) {
        let send_pending = {
            let mut state = self.inner.state.lock().await;
            if !state.offline {
                warn!(app_key = %self.app_key(), "disable_offline_mode called while online");
                return;
            }
            state.offline = false;

            match device_id.filter(|id| !id.is_empty()) {
                Some(id) if id != state.device_id => {
                    self.set_device_id_locked(&mut state, id.to_string(), DeviceIdType::DeveloperSupplied)
                        .await;
                }
                _ if state.device_id == TEMP_DEVICE_ID || state.device_id.is_empty() => {
                    let (id, id_type) = match self.stored_device_id().await.filter(|id| id != TEMP_DEVICE_ID) {
                        Some(stored) => {
                            let id_type = self.stored_device_id_type().await.unwrap_or(DeviceIdType::SdkGenerated);
                            (stored, id_type)
                        }
                        None => (generate_uuid(), DeviceIdType::SdkGenerated),
                    };
                    self.set_device_id_locked(&mut state, id, id_type).await;
                }
                _ => {}
            }

            let device_id = state.device_id.clone();
            let rewritten = state
                .requests
                .rewrite_device_id(TEMP_DEVICE_ID, &device_id, &self.inner.store)
                .await;
            info!(app_key = %self.app_key(), rewritten, "offline mode disabled");

            std::mem::take(&mut state.pending_health_check)
        };

        if send_pending {
            self.send_health_check().await;
        }
    }
}
