// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for beacon-sdk.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `beacon_sdk_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `app_key`: the tracker the metric belongs to
//! - `endpoint`: dispatch name (`send_request_queue`, `send_health_check`, ...)
//! - `outcome`: success, failure, rejected, evicted

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of putting a request on the queue
pub fn record_enqueue(app_key: &str, outcome: &str) {
    counter!(
        "beacon_sdk_requests_enqueued_total",
        "app_key" => app_key.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the outcome of one network dispatch
pub fn record_dispatch(endpoint: &str, outcome: &str) {
    counter!(
        "beacon_sdk_dispatch_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_dispatch_latency(endpoint: &str, duration: Duration) {
    histogram!(
        "beacon_sdk_dispatch_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record how many events were folded into one request
pub fn record_event_batch(app_key: &str, count: usize) {
    histogram!(
        "beacon_sdk_event_batch_size",
        "app_key" => app_key.to_string()
    )
    .record(count as f64);
}

pub fn set_request_queue_depth(app_key: &str, depth: usize) {
    gauge!("beacon_sdk_request_queue_depth", "app_key" => app_key.to_string()).set(depth as f64);
}

pub fn set_event_queue_depth(app_key: &str, depth: usize) {
    gauge!("beacon_sdk_event_queue_depth", "app_key" => app_key.to_string()).set(depth as f64);
}

/// Record a storage-change notification applied from another context
pub fn record_reconcile(key: &str) {
    counter!("beacon_sdk_reconcile_total", "key" => key.to_string()).increment(1);
}

/// Times a dispatch and records it on drop.
pub struct DispatchTimer {
    endpoint: String,
    start: Instant,
}

impl DispatchTimer {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for DispatchTimer {
    fn drop(&mut self) {
        record_dispatch_latency(&self.endpoint, self.start.elapsed());
    }
}
