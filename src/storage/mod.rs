// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent key-value storage.
//!
//! [`KvStore`] sits in front of a [`StorageBackend`] and owns the key layout
//! `[namespace/]app_key/logical_key`, value (de)serialization, and change
//! notifications for other contexts.
//!
//! Backend priority when a tracker is built:
//! host-supplied backend → native SQLite → cookie jar → none.

pub mod traits;
pub mod memory;
pub mod sqlite;
pub mod cookie;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::WallClock;
use crate::config::{SdkConfig, StorageChoice};
use crate::serializer::Serializer;
use crate::sync::channel::{ContextId, StorageChange, StorageChannel};

pub use traits::{StorageBackend, StorageError};

/// Logical keys of persisted tracker state.
pub mod keys {
    pub const DEVICE_ID: &str = "cly_id";
    pub const DEVICE_ID_TYPE: &str = "cly_id_type";
    pub const SESSION: &str = "cly_session";
    pub const EVENT_QUEUE: &str = "cly_event";
    pub const REQUEST_QUEUE: &str = "cly_queue";
    pub const REMOTE_CONFIGS: &str = "cly_remote_configs";
    pub const IGNORE: &str = "cly_ignore";
    pub const TOKEN: &str = "cly_token";
    pub const OLD_TOKEN: &str = "cly_old_token";
    pub const CAMPAIGN_ID: &str = "cly_cmp_id";
    pub const CAMPAIGN_USER: &str = "cly_cmp_uid";
    pub const HC_ERROR_COUNT: &str = "cly_hc_error_count";
    pub const HC_WARNING_COUNT: &str = "cly_hc_warning_count";
    pub const HC_STATUS_CODE: &str = "cly_hc_status_code";
    pub const HC_ERROR_MESSAGE: &str = "cly_hc_error_message";

    /// Keys copied from the legacy unnamespaced layout.
    pub const MIGRATED: [&str; 10] = [
        DEVICE_ID,
        DEVICE_ID_TYPE,
        EVENT_QUEUE,
        SESSION,
        REQUEST_QUEUE,
        REMOTE_CONFIGS,
        TOKEN,
        CAMPAIGN_ID,
        CAMPAIGN_USER,
        IGNORE,
    ];
}

/// Pick the backend for a tracker.
///
/// A host backend always wins. Otherwise native storage is tried when a path
/// is configured, falling back to the cookie jar unless the config insists on
/// native storage only.
pub async fn select_backend(
    config: &SdkConfig,
    host: Option<Arc<dyn StorageBackend>>,
    clock: Arc<dyn WallClock>,
) -> Option<Arc<dyn StorageBackend>> {
    if config.storage == StorageChoice::None {
        info!(app_key = %config.app_key, "storage disabled");
        return None;
    }
    if let Some(host) = host {
        return Some(host);
    }
    if config.storage == StorageChoice::Cookie {
        return Some(Arc::new(cookie::CookieBackend::new(clock)));
    }

    if let Some(ref path) = config.native_storage_path {
        match sqlite::SqliteBackend::open(path).await {
            Ok(backend) => return Some(Arc::new(backend)),
            Err(e) => warn!(path = %path, error = %e, "native storage unavailable"),
        }
    }

    if config.storage == StorageChoice::LocalStorage {
        warn!(app_key = %config.app_key, "native storage required but unavailable, nothing will be persisted");
        return None;
    }
    info!(app_key = %config.app_key, "using the in-memory cookie jar, queues will not survive a restart");
    Some(Arc::new(cookie::CookieBackend::new(clock)))
}

/// Namespaced, serializing view over a backend.
///
/// Backend failures are logged and swallowed: reads return `None`, writes
/// are dropped.
pub struct KvStore {
    backend: Option<Arc<dyn StorageBackend>>,
    serializer: Arc<dyn Serializer>,
    namespace: String,
    prefix: String,
    origin: ContextId,
    channel: Option<StorageChannel>,
}

impl KvStore {
    pub fn new(
        backend: Option<Arc<dyn StorageBackend>>,
        serializer: Arc<dyn Serializer>,
        namespace: &str,
        app_key: &str,
    ) -> Self {
        let prefix = if namespace.is_empty() {
            format!("{}/", app_key)
        } else {
            format!("{}/{}/", namespace, app_key)
        };
        Self {
            backend,
            serializer,
            namespace: namespace.to_string(),
            prefix,
            origin: ContextId::next(),
            channel: None,
        }
    }

    /// Publish every write to `channel`, tagged with `origin`.
    #[must_use]
    pub fn with_channel(mut self, channel: StorageChannel, origin: ContextId) -> Self {
        self.channel = Some(channel);
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |b| b.name())
    }

    #[must_use]
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_raw(&self.full_key(key)).await
    }

    /// Store a value. `null` is ignored.
    pub async fn set(&self, key: &str, value: &Value) {
        if value.is_null() {
            return;
        }
        let Some(ref backend) = self.backend else { return };
        let full = self.full_key(key);
        let serialized = self.serializer.serialize(value);
        match backend.set_item(&full, &serialized).await {
            Ok(()) => self.publish(full, Some(serialized)),
            Err(e) => warn!(key = %full, error = %e, "storage write failed"),
        }
    }

    pub async fn remove(&self, key: &str) {
        self.remove_raw(&self.full_key(key)).await;
    }

    /// Read an exact backend key, without namespacing.
    ///
    /// Device ids skip the deserializer so numeric ids stay strings.
    pub async fn get_raw(&self, raw_key: &str) -> Option<Value> {
        let backend = self.backend.as_ref()?;
        let raw = match backend.get_item(raw_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %raw_key, error = %e, "storage read failed");
                return None;
            }
        };
        if raw_key.ends_with(keys::DEVICE_ID) {
            return Some(Value::String(raw));
        }
        Some(self.serializer.deserialize(&raw))
    }

    pub async fn remove_raw(&self, raw_key: &str) {
        let Some(ref backend) = self.backend else { return };
        match backend.remove_item(raw_key).await {
            Ok(()) => self.publish(raw_key.to_string(), None),
            Err(e) => warn!(key = %raw_key, error = %e, "storage remove failed"),
        }
    }

    fn publish(&self, key: String, new_value: Option<String>) {
        if let Some(ref channel) = self.channel {
            channel.publish(StorageChange {
                origin: self.origin,
                key,
                new_value,
            });
        }
    }

    /// Move values from the legacy `namespace + key` layout into this
    /// store's layout. Returns the number of keys moved.
    ///
    /// The legacy request queue was shared by all apps, so only entries
    /// carrying this app key are carried over.
    pub async fn migrate_legacy(&self, app_key: &str) -> usize {
        let mut moved = 0;
        for key in keys::MIGRATED {
            let legacy_key = format!("{}{}", self.namespace, key);
            if legacy_key == self.full_key(key) {
                continue;
            }
            let Some(value) = self.get_raw(&legacy_key).await else { continue };

            let value = if key == keys::REQUEST_QUEUE {
                match value {
                    Value::Array(entries) => Value::Array(
                        entries
                            .into_iter()
                            .filter(|e| e.get("app_key").and_then(Value::as_str) == Some(app_key))
                            .collect(),
                    ),
                    other => other,
                }
            } else {
                value
            };

            self.set(key, &value).await;
            self.remove_raw(&legacy_key).await;
            moved += 1;
        }
        if moved > 0 {
            debug!(app_key, moved, "migrated legacy storage keys");
        }
        moved
    }
}
