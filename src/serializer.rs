// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Value <-> stored string conversion.
//!
//! Strings are stored raw, everything else as compact JSON. Reading never
//! fails: an empty string stays empty and anything that isn't valid JSON
//! comes back as the original string.

use serde_json::Value;

/// Converts values to and from their persisted string form.
///
/// Hosts can supply their own implementation through the tracker builder.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> String;
    fn deserialize(&self, raw: &str) -> Value;
}

/// Default JSON serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn deserialize(&self, raw: &str) -> Value {
        if raw.is_empty() {
            return Value::String(String::new());
        }
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    }
}
