// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applying storage writes made by another context.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::Tracker;
use crate::buffer::events::decode_events;
use crate::buffer::requests::decode_requests;
use crate::record::DeviceIdType;
use crate::storage::keys;

impl Tracker {
    /// Refresh the in-memory mirror of `key` from a value another context
    /// wrote. `None` means the key was removed.
    ///
    /// Never touches the network or writes back to storage. Returns `false`
    /// for keys this tracker does not mirror.
    pub async fn on_storage_change(&self, key: &str, raw: Option<&str>) -> bool {
        let serializer = self.inner.store.serializer().clone();
        let decode = |fallback: &str| serializer.deserialize(raw.unwrap_or(fallback));

        let mut state = self.inner.state.lock().await;
        match key {
            keys::REQUEST_QUEUE => {
                state.requests.replace_mirror(decode_requests(decode("[]")));
                crate::metrics::set_request_queue_depth(self.app_key(), state.requests.len());
            }
            keys::EVENT_QUEUE => {
                state.events.replace_mirror(decode_events(decode("[]")));
                crate::metrics::set_event_queue_depth(self.app_key(), state.events.len());
            }
            keys::REMOTE_CONFIGS => {
                state.remote_config = match decode("{}") {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
            }
            keys::IGNORE => {
                state.opted_out = matches!(decode("false"), Value::Bool(true));
            }
            keys::DEVICE_ID => match raw {
                Some(id) if !id.is_empty() => state.device_id = id.to_string(),
                _ => {
                    debug!("device id removed elsewhere, keeping current id");
                    return false;
                }
            },
            keys::DEVICE_ID_TYPE => match raw.and_then(|r| DeviceIdType::from_value(&serializer.deserialize(r))) {
                Some(id_type) => state.device_id_type = id_type,
                None => return false,
            },
            _ => {
                trace!(key, "storage change ignored");
                return false;
            }
        }
        debug!(app_key = %self.app_key(), key, "mirror refreshed from another context");
        crate::metrics::record_reconcile(key);
        true
    }
}
