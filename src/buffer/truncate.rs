// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Length and size limits applied to keys and segmentation.

use serde_json::{Map, Value};
use tracing::debug;

/// Internal event keys that are never shortened.
pub const INTERNAL_EVENT_KEYS: [&str; 6] = [
    "[CLY]_nps",
    "[CLY]_survey",
    "[CLY]_star_rating",
    "[CLY]_view",
    "[CLY]_orientation",
    "[CLY]_action",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_key_length: usize,
    pub max_value_size: usize,
    pub max_segmentation_values: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_key_length: 128,
            max_value_size: 256,
            max_segmentation_values: 100,
        }
    }
}

/// Cut a string to at most `limit` characters.
#[must_use]
pub fn truncate_str(s: &str, limit: usize, context: &str) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    debug!(context, value = %s, limit, "value longer than accepted length, truncating");
    s.chars().take(limit).collect()
}

/// Strings are cut to `limit`. Numbers whose text is longer than `limit`
/// become truncated strings. Everything else passes through.
#[must_use]
pub fn truncate_value(value: &Value, limit: usize, context: &str) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(s, limit, context)),
        Value::Number(n) => {
            let text = n.to_string();
            if text.chars().count() > limit {
                Value::String(truncate_str(&text, limit, context))
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

/// Keep the first `max_segmentation_values` entries, then cut each key and value.
#[must_use]
pub fn truncate_segmentation(map: &Map<String, Value>, limits: &Limits, context: &str) -> Map<String, Value> {
    map.iter()
        .take(limits.max_segmentation_values)
        .map(|(k, v)| {
            (
                truncate_str(k, limits.max_key_length, context),
                truncate_value(v, limits.max_value_size, context),
            )
        })
        .collect()
}

/// Event keys are cut to `max_key_length` unless they are internal keys.
#[must_use]
pub fn truncate_event_key(key: &str, limits: &Limits) -> String {
    if INTERNAL_EVENT_KEYS.contains(&key) {
        key.to_string()
    } else {
        truncate_str(key, limits.max_key_length, "add_event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tight() -> Limits {
        Limits {
            max_key_length: 3,
            max_value_size: 4,
            max_segmentation_values: 2,
        }
    }

    #[test]
    fn test_truncate_str_exact_limit() {
        assert_eq!(truncate_str("abcdef", 3, "t"), "abc");
        assert_eq!(truncate_str("ab", 3, "t"), "ab");
        assert_eq!(truncate_str("ééé", 2, "t"), "éé");
    }

    #[test]
    fn test_long_numbers_become_strings() {
        assert_eq!(truncate_value(&json!(123456), 4, "t"), json!("1234"));
        assert_eq!(truncate_value(&json!(12), 4, "t"), json!(12));
        assert_eq!(truncate_value(&json!(true), 1, "t"), json!(true));
    }

    #[test]
    fn test_segmentation_keeps_first_entries() {
        let seg = json!({"first": "valuevalue", "second": 1, "third": 3});
        let out = truncate_segmentation(seg.as_object().unwrap(), &tight(), "t");
        assert_eq!(out.len(), 2);
        assert_eq!(Value::Object(out), json!({"fir": "valu", "sec": 1}));
    }

    #[test]
    fn test_internal_keys_not_truncated() {
        assert_eq!(truncate_event_key("[CLY]_view", &tight()), "[CLY]_view");
        assert_eq!(truncate_event_key("purchase", &tight()), "pur");
    }
}
