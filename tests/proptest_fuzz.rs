//! Property-based tests (fuzzing) for the serializer, truncation and queues.
//!
//! Uses proptest to generate random/malformed inputs and verify nothing
//! panics and the documented limits always hold.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{Map, Value};

use beacon_sdk::buffer::events::decode_events;
use beacon_sdk::buffer::requests::decode_requests;
use beacon_sdk::buffer::truncate::{truncate_event_key, truncate_segmentation, truncate_str, INTERNAL_EVENT_KEYS};
use beacon_sdk::buffer::{Envelope, Limits, RequestBuffer};
use beacon_sdk::storage::memory::MemoryBackend;
use beacon_sdk::transport::dispatcher::{checksum, encode_params, validate_response};
use beacon_sdk::transport::ResponseShape;
use beacon_sdk::{JsonSerializer, KvStore, Request, Serializer};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate arbitrary JSON values
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

fn limits_strategy() -> impl Strategy<Value = Limits> {
    (1usize..40, 1usize..40, 1usize..20).prop_map(|(k, v, s)| Limits {
        max_key_length: k,
        max_value_size: v,
        max_segmentation_values: s,
    })
}

fn segmentation_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::hash_map(
        ".{0,60}",
        prop_oneof![
            ".{0,60}".prop_map(Value::String),
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::Bool),
        ],
        0..40,
    )
    .prop_map(|m| m.into_iter().collect())
}

fn store() -> KvStore {
    KvStore::new(Some(Arc::new(MemoryBackend::new())), Arc::new(JsonSerializer), "", "app")
}

fn envelope() -> Envelope {
    Envelope {
        app_key: "app".into(),
        device_id: "device-1".into(),
        track_location: true,
        ..Default::default()
    }
}

// =============================================================================
// Serializer
// =============================================================================

proptest! {
    /// Non-string values survive a store/load cycle unchanged
    #[test]
    fn prop_serializer_round_trips_structured_values(value in arbitrary_json_strategy()) {
        prop_assume!(!value.is_string());
        let serializer = JsonSerializer;
        let stored = serializer.serialize(&value);
        prop_assert_eq!(serializer.deserialize(&stored), value);
    }

    /// Strings are stored raw
    #[test]
    fn prop_serializer_stores_strings_raw(s in ".*") {
        prop_assert_eq!(JsonSerializer.serialize(&Value::String(s.clone())), s);
    }

    /// Reading arbitrary text never panics; invalid JSON comes back verbatim
    #[test]
    fn fuzz_deserialize_arbitrary_text(raw in ".*") {
        let value = JsonSerializer.deserialize(&raw);
        if serde_json::from_str::<Value>(&raw).is_err() {
            prop_assert_eq!(value, Value::String(raw));
        }
    }

    /// Decoding persisted queues never panics on arbitrary JSON
    #[test]
    fn fuzz_decode_queues(value in arbitrary_json_strategy()) {
        let _ = decode_requests(value.clone());
        let _ = decode_events(value);
    }
}

// =============================================================================
// Truncation Limits
// =============================================================================

proptest! {
    /// Truncation yields the first min(len, limit) characters
    #[test]
    fn prop_truncate_str_is_prefix(s in ".{0,200}", limit in 0usize..100) {
        let cut = truncate_str(&s, limit, "prop");
        let expected: String = s.chars().take(limit).collect();
        prop_assert_eq!(cut, expected);
    }

    /// Segmentation never exceeds any of the three limits
    #[test]
    fn prop_segmentation_within_limits(seg in segmentation_strategy(), limits in limits_strategy()) {
        let out = truncate_segmentation(&seg, &limits, "prop");
        prop_assert!(out.len() <= limits.max_segmentation_values);
        prop_assert!(out.len() <= seg.len());
        for (k, v) in &out {
            prop_assert!(k.chars().count() <= limits.max_key_length);
            if let Value::String(s) = v {
                prop_assert!(s.chars().count() <= limits.max_value_size);
            }
        }
    }

    /// Internal event keys pass through untouched at any limit
    #[test]
    fn prop_internal_keys_never_truncated(idx in 0usize..INTERNAL_EVENT_KEYS.len(), limits in limits_strategy()) {
        let key = INTERNAL_EVENT_KEYS[idx];
        prop_assert_eq!(truncate_event_key(key, &limits), key);
    }
}

// =============================================================================
// Request Queue Bound
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any number of enqueues the queue holds the newest
    /// min(count, max_depth) requests, oldest first
    #[test]
    fn prop_eviction_keeps_last_n_in_order(max_depth in 1usize..20, count in 0usize..60) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let kept = runtime.block_on(async {
            let store = store();
            let mut buffer = RequestBuffer::new(max_depth);
            for n in 0..count {
                buffer.enqueue(Request::new().with("n", n), &envelope(), &store).await;
                assert!(buffer.len() <= max_depth);
            }
            buffer
                .to_vec()
                .iter()
                .map(|r| r.get("n").and_then(Value::as_u64).unwrap() as usize)
                .collect::<Vec<_>>()
        });

        let expected: Vec<usize> = (count.saturating_sub(max_depth)..count).collect();
        prop_assert_eq!(kept, expected);
    }
}

// =============================================================================
// Dispatch Encoding
// =============================================================================

proptest! {
    /// Every encoded value decodes back to its original text
    #[test]
    fn prop_encode_params_decodable(pairs in prop::collection::vec(("[a-z_]{1,10}", ".{0,50}"), 1..10)) {
        let mut request = Request::new();
        let mut expected = Map::new();
        for (k, v) in &pairs {
            request.insert(k.as_str(), v.as_str());
            expected.insert(k.clone(), Value::String(v.clone()));
        }

        let encoded = encode_params(&request);
        let mut decoded = Map::new();
        for pair in encoded.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            decoded.insert(k.to_string(), Value::String(urlencoding::decode(v).unwrap().into_owned()));
        }
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn prop_checksum_is_hex_sha256(data in ".*", salt in ".*") {
        let digest = checksum(&data, &salt);
        prop_assert_eq!(digest.len(), 64);
        prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Response validation never panics and never accepts a non-2xx status
    #[test]
    fn fuzz_validate_response(status in 0u16..1000, body in ".*") {
        for shape in [ResponseShape::Object, ResponseShape::ObjectOrArray] {
            let result = validate_response(status, &body, shape);
            if !(200..300).contains(&status) {
                prop_assert!(result.is_err());
            }
        }
    }
}
