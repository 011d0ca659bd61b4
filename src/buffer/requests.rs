// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending HTTP requests, FIFO, bounded, persisted under `cly_queue`.
//!
//! The depth bound is strict: after any enqueue the queue holds at most
//! `max_depth` entries, the oldest being evicted first.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{error, warn};

use crate::record::{DeviceIdType, Request};
use crate::storage::{keys, KvStore};

/// Context snapshot stamped onto every request at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub app_key: String,
    pub device_id: String,
    pub device_id_type: Option<DeviceIdType>,
    pub sdk_name: String,
    pub sdk_version: String,
    pub app_version: String,
    pub user_agent: Option<String>,
    pub track_location: bool,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: i64,
    pub hour: u32,
    pub dow: u32,
    pub opted_out: bool,
}

impl Envelope {
    /// Write envelope fields into `request`. Existing fields are overwritten
    /// in place.
    pub fn apply(&self, request: &mut Request) {
        request.insert("app_key", self.app_key.as_str());
        request.insert("device_id", self.device_id.as_str());
        request.insert("sdk_name", self.sdk_name.as_str());
        request.insert("sdk_version", self.sdk_version.as_str());
        if let Some(t) = self.device_id_type {
            request.insert("t", t);
        }
        request.insert("av", self.app_version.as_str());

        if let Some(ref ua) = self.user_agent {
            attach_user_agent(request, ua);
        }

        if self.track_location {
            if let Some(ref cc) = self.country_code {
                request.insert("country_code", cc.as_str());
            }
            if let Some(ref city) = self.city {
                request.insert("city", city.as_str());
            }
            if let Some(ref ip) = self.ip_address {
                request.insert("ip_address", ip.as_str());
            }
        } else {
            request.insert("location", "");
        }

        request.insert("timestamp", self.timestamp);
        request.insert("hour", self.hour);
        request.insert("dow", self.dow);
    }
}

/// Make sure the `metrics` parameter carries `_ua`.
fn attach_user_agent(request: &mut Request, ua: &str) {
    let mut metrics = match request.get("metrics") {
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => return,
        },
        Some(_) => return,
        None => serde_json::Map::new(),
    };
    if !metrics.contains_key("_ua") {
        metrics.insert("_ua".to_string(), Value::String(ua.to_string()));
        request.insert("metrics", Value::Object(metrics).to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    OptedOut,
    MissingAppKey,
    MissingDeviceId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Queued { depth: usize },
    /// Queued, but the oldest entry had to go to make room.
    Evicted { evicted: Request, depth: usize },
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    #[must_use]
    pub fn is_queued(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

#[derive(Debug)]
pub struct RequestBuffer {
    requests: VecDeque<Request>,
    max_depth: usize,
}

impl RequestBuffer {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            requests: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Load the persisted queue, keeping only the newest `max_depth` entries.
    pub async fn load(store: &KvStore, max_depth: usize) -> Self {
        let mut buffer = Self::new(max_depth);
        if let Some(value) = store.get(keys::REQUEST_QUEUE).await {
            buffer.replace_mirror(decode_requests(value));
        }
        buffer
    }

    /// Stamp and append a request, evicting the oldest entry on overflow.
    pub async fn enqueue(
        &mut self,
        mut request: Request,
        envelope: &Envelope,
        store: &KvStore,
    ) -> EnqueueOutcome {
        if envelope.opted_out {
            return EnqueueOutcome::Rejected(RejectReason::OptedOut);
        }
        if envelope.app_key.is_empty() {
            error!("request dropped, app_key is missing");
            return EnqueueOutcome::Rejected(RejectReason::MissingAppKey);
        }
        if envelope.device_id.is_empty() {
            error!(app_key = %envelope.app_key, "request dropped, device_id is missing");
            return EnqueueOutcome::Rejected(RejectReason::MissingDeviceId);
        }

        envelope.apply(&mut request);

        let evicted = if self.requests.len() >= self.max_depth {
            self.requests.pop_front()
        } else {
            None
        };
        self.requests.push_back(request);
        self.persist(store).await;

        let depth = self.requests.len();
        match evicted {
            Some(evicted) => {
                warn!(app_key = %envelope.app_key, depth, "request queue full, oldest request dropped");
                EnqueueOutcome::Evicted { evicted, depth }
            }
            None => EnqueueOutcome::Queued { depth },
        }
    }

    #[must_use]
    pub fn peek_head(&self) -> Option<&Request> {
        self.requests.front()
    }

    pub async fn remove_head(&mut self, store: &KvStore) -> Option<Request> {
        let head = self.requests.pop_front();
        if head.is_some() {
            self.persist(store).await;
        }
        head
    }

    /// Attach `rr` (the current depth) to the head and persist.
    /// Returns the head as it will be sent.
    pub async fn stamp_head(&mut self, store: &KvStore) -> Option<Request> {
        let depth = self.requests.len();
        let head = self.requests.front_mut()?;
        head.insert("rr", depth);
        let sent = head.clone();
        self.persist(store).await;
        Some(sent)
    }

    /// Remove `sent` after a confirmed delivery. It is normally still the
    /// head; otherwise the queue changed mid-flight and the first equal
    /// entry goes.
    pub async fn remove_delivered(&mut self, sent: &Request, store: &KvStore) -> bool {
        if self.peek_head() == Some(sent) {
            return self.remove_head(store).await.is_some();
        }
        let Some(pos) = self.requests.iter().position(|r| r == sent) else {
            return false;
        };
        self.requests.remove(pos);
        self.persist(store).await;
        true
    }

    /// Rewrite `device_id` on queued requests still carrying `from`.
    pub async fn rewrite_device_id(&mut self, from: &str, to: &str, store: &KvStore) -> usize {
        let mut rewritten = 0;
        for request in self.requests.iter_mut() {
            if request.get("device_id").and_then(Value::as_str) == Some(from) {
                request.insert("device_id", to);
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            self.persist(store).await;
        }
        rewritten
    }

    /// Overwrite the in-memory queue without touching storage.
    pub fn replace_mirror(&mut self, requests: Vec<Request>) {
        let skip = requests.len().saturating_sub(self.max_depth);
        self.requests = requests.into_iter().skip(skip).collect();
    }

    pub async fn clear(&mut self, store: &KvStore) {
        self.requests.clear();
        self.persist(store).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Request> {
        self.requests.iter().cloned().collect()
    }

    async fn persist(&self, store: &KvStore) {
        match serde_json::to_value(&self.requests) {
            Ok(value) => store.set(keys::REQUEST_QUEUE, &value).await,
            Err(e) => warn!(error = %e, "failed to encode request queue"),
        }
    }
}

/// Decode a stored request list, falling back to empty.
#[must_use]
pub fn decode_requests(value: Value) -> Vec<Request> {
    match serde_json::from_value(value) {
        Ok(requests) => requests,
        Err(e) => {
            warn!(error = %e, "stored request queue is malformed, starting empty");
            Vec::new()
        }
    }
}
