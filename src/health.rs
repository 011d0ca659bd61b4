// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Self-reported health counters.
//!
//! Counts logged errors and warnings and remembers the last failed queue
//! delivery. The counters are persisted and shipped in the `hc` parameter of
//! a health-check request.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::storage::{keys, KvStore};

/// Max characters of the last error message sent in a health check.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub error_count: u64,
    pub warning_count: u64,
    /// HTTP status of the last failed delivery, -1 if none
    pub status_code: i64,
    pub error_message: String,
}

#[derive(Debug)]
pub struct HealthCounters {
    errors: AtomicU64,
    warnings: AtomicU64,
    status_code: AtomicI64,
    message: Mutex<String>,
}

impl Default for HealthCounters {
    fn default() -> Self {
        Self {
            errors: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            status_code: AtomicI64::new(-1),
            message: Mutex::new(String::new()),
        }
    }
}

impl HealthCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warning(&self) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Remember the status and body of a failed delivery.
    pub fn record_failure(&self, status_code: i64, message: &str) {
        self.status_code.store(status_code, Ordering::Relaxed);
        *self.message.lock() = message.to_string();
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            error_count: self.errors.load(Ordering::Relaxed),
            warning_count: self.warnings.load(Ordering::Relaxed),
            status_code: self.status_code.load(Ordering::Relaxed),
            error_message: self.message.lock().clone(),
        }
    }

    /// True once anything worth reporting has been recorded.
    #[cfg(test)]
    #[must_use]
    pub fn has_data(&self) -> bool {
        let s = self.snapshot();
        s.error_count > 0 || s.warning_count > 0 || s.status_code != -1 || !s.error_message.is_empty()
    }

    pub fn reset(&self) {
        self.errors.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);
        self.status_code.store(-1, Ordering::Relaxed);
        self.message.lock().clear();
    }

    /// The `hc` parameter: `{"el":..,"wl":..,"sc":..,"em":..}`.
    ///
    /// `em` is the JSON-encoded message cut to [`MAX_ERROR_MESSAGE_LEN`]
    /// characters, or empty when there is none.
    #[must_use]
    pub fn to_param(&self) -> String {
        let s = self.snapshot();
        let em = if s.error_message.is_empty() {
            String::new()
        } else {
            let cut: String = s.error_message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
            Value::String(cut).to_string()
        };
        json!({
            "el": s.error_count,
            "wl": s.warning_count,
            "sc": s.status_code,
            "em": em,
        })
        .to_string()
    }

    pub async fn persist(&self, store: &KvStore) {
        let s = self.snapshot();
        store.set(keys::HC_ERROR_COUNT, &json!(s.error_count)).await;
        store.set(keys::HC_WARNING_COUNT, &json!(s.warning_count)).await;
        store.set(keys::HC_STATUS_CODE, &json!(s.status_code)).await;
        store.set(keys::HC_ERROR_MESSAGE, &json!(s.error_message)).await;
    }

    /// Restore counters persisted by an earlier run.
    pub async fn load(&self, store: &KvStore) {
        if let Some(n) = store.get(keys::HC_ERROR_COUNT).await.and_then(|v| v.as_u64()) {
            self.errors.store(n, Ordering::Relaxed);
        }
        if let Some(n) = store.get(keys::HC_WARNING_COUNT).await.and_then(|v| v.as_u64()) {
            self.warnings.store(n, Ordering::Relaxed);
        }
        if let Some(n) = store.get(keys::HC_STATUS_CODE).await.and_then(|v| v.as_i64()) {
            self.status_code.store(n, Ordering::Relaxed);
        }
        if let Some(v) = store.get(keys::HC_ERROR_MESSAGE).await {
            *self.message.lock() = crate::record::param_text(&v);
        }
    }
}
