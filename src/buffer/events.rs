// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending analytic events, persisted under `cly_event` on every mutation.

use serde_json::Value;
use tracing::{debug, error, warn};

use super::truncate::{truncate_event_key, truncate_segmentation, Limits};
use crate::record::{EventInput, EventRecord};
use crate::storage::{keys, KvStore};

/// Stamp fields the tracker assigns to a new event.
#[derive(Debug, Clone, Default)]
pub struct EventStamp {
    pub timestamp: i64,
    pub hour: u32,
    pub dow: u32,
    pub id: String,
    pub cvid: Option<String>,
    pub pvid: Option<String>,
}

#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<EventRecord>,
}

impl EventBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted queue. Anything that doesn't decode as a list of
    /// events is treated as empty.
    pub async fn load(store: &KvStore) -> Self {
        let events = match store.get(keys::EVENT_QUEUE).await {
            Some(value) => decode_events(value),
            None => Vec::new(),
        };
        Self { events }
    }

    /// Stamp, truncate and append an event. Empty keys are rejected.
    ///
    /// Returns `false` if the event was rejected.
    pub async fn append(
        &mut self,
        input: EventInput,
        stamp: EventStamp,
        limits: &Limits,
        store: &KvStore,
    ) -> bool {
        if input.key.is_empty() {
            error!("add_event, event key is empty, event dropped");
            return false;
        }

        let record = EventRecord {
            key: truncate_event_key(&input.key, limits),
            count: input.count.unwrap_or(1),
            sum: input.sum,
            dur: input.dur,
            segmentation: input
                .segmentation
                .as_ref()
                .map(|seg| truncate_segmentation(seg, limits, "add_event")),
            timestamp: stamp.timestamp,
            hour: stamp.hour,
            dow: stamp.dow,
            id: stamp.id,
            cvid: stamp.cvid,
            pvid: stamp.pvid,
        };
        debug!(key = %record.key, "event queued");
        self.events.push(record);
        self.persist(store).await;
        true
    }

    /// Remove up to `max` events from the front.
    pub async fn drain_batch(&mut self, max: usize, store: &KvStore) -> Vec<EventRecord> {
        let batch = if self.events.len() <= max {
            std::mem::take(&mut self.events)
        } else {
            self.events.drain(..max).collect()
        };
        if !batch.is_empty() {
            self.persist(store).await;
        }
        batch
    }

    /// Remove every event regardless of batch limits.
    pub async fn force_drain_all(&mut self, store: &KvStore) -> Vec<EventRecord> {
        let all = std::mem::take(&mut self.events);
        if !all.is_empty() {
            self.persist(store).await;
        }
        all
    }

    /// Overwrite the in-memory list without touching storage.
    pub fn replace_mirror(&mut self, events: Vec<EventRecord>) {
        self.events = events;
    }

    pub async fn clear(&mut self, store: &KvStore) {
        self.events.clear();
        self.persist(store).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[EventRecord] {
        &self.events
    }

    async fn persist(&self, store: &KvStore) {
        match serde_json::to_value(&self.events) {
            Ok(value) => store.set(keys::EVENT_QUEUE, &value).await,
            Err(e) => warn!(error = %e, "failed to encode event queue"),
        }
    }
}

/// Decode a stored event list, falling back to empty.
#[must_use]
pub fn decode_events(value: Value) -> Vec<EventRecord> {
    match serde_json::from_value(value) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "stored event queue is malformed, starting empty");
            Vec::new()
        }
    }
}
