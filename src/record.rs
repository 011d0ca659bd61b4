// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event and request records.
//!
//! - [`EventInput`]: what a producer hands in
//! - [`EventRecord`]: the stamped, truncated event as it sits in the event queue
//! - [`Request`]: a flat parameter map as it sits in the request queue
//! - [`DeviceIdType`]: how the current device id was obtained

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder device id used while offline.
pub const TEMP_DEVICE_ID: &str = "[CLY]_temp_id";

/// Event key recorded for view changes.
pub const VIEW_EVENT_KEY: &str = "[CLY]_view";

/// An event as submitted by a producer, before stamping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventInput {
    pub key: String,
    pub count: Option<u64>,
    pub sum: Option<f64>,
    pub dur: Option<f64>,
    pub segmentation: Option<Map<String, Value>>,
}

impl EventInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn sum(mut self, sum: f64) -> Self {
        self.sum = Some(sum);
        self
    }

    #[must_use]
    pub fn dur(mut self, dur: f64) -> Self {
        self.dur = Some(dur);
        self
    }

    #[must_use]
    pub fn segment(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.segmentation
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A stamped event waiting in the event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub key: String,
    #[serde(default = "default_count")]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub dow: u32,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvid: Option<String>,
}

fn default_count() -> u64 {
    1
}

/// A prepared request: ordered parameter names mapped to JSON scalars or
/// JSON-encoded strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Request(Map<String, Value>);

impl Request {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a request from `(name, value)` pairs, keeping their order.
    #[cfg(test)]
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Insert or overwrite a parameter. Overwriting keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Parameter as text, the way it goes on the wire.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).map(param_text)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Request {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Wire text for a parameter value: strings as-is, everything else as JSON.
#[must_use]
pub fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How the current device id was obtained. Sent as the `t` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceIdType {
    DeveloperSupplied,
    SdkGenerated,
    TemporaryId,
    UrlProvided,
}

impl DeviceIdType {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::DeveloperSupplied => 0,
            Self::SdkGenerated => 1,
            Self::TemporaryId => 2,
            Self::UrlProvided => 3,
        }
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::DeveloperSupplied),
            1 => Some(Self::SdkGenerated),
            2 => Some(Self::TemporaryId),
            3 => Some(Self::UrlProvided),
            _ => None,
        }
    }

    /// Decode a persisted tag. Numeric strings are accepted too.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().and_then(Self::from_code),
            Value::String(s) => s.trim().parse().ok().and_then(Self::from_code),
            _ => None,
        }
    }
}

impl From<DeviceIdType> for Value {
    fn from(t: DeviceIdType) -> Self {
        Value::from(t.code())
    }
}

impl std::fmt::Display for DeviceIdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeveloperSupplied => write!(f, "DeveloperSupplied"),
            Self::SdkGenerated => write!(f, "SdkGenerated"),
            Self::TemporaryId => write!(f, "TemporaryId"),
            Self::UrlProvided => write!(f, "UrlProvided"),
        }
    }
}

/// Random v4 UUID used as a generated device id.
#[must_use]
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Event/view id: 8 random hex chars followed by the millisecond timestamp.
#[must_use]
pub fn secure_random(now_ms: i64) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", &random[..8], now_ms)
}
