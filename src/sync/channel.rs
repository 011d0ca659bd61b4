// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage-change notification channel shared between execution contexts.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::trace;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identifies one execution context (one "tab") attached to a channel.
///
/// A context never reacts to its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// One persisted write or removal. `new_value` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub origin: ContextId,
    pub key: String,
    pub new_value: Option<String>,
}

impl StorageChange {
    /// Split a `[namespace/]app_key/logical_key` key into `(app_key, logical_key)`.
    #[must_use]
    pub fn key_parts(&self) -> Option<(&str, &str)> {
        let mut parts = self.key.rsplit('/');
        let logical = parts.next()?;
        let app_key = parts.next()?;
        Some((app_key, logical))
    }
}

/// Broadcast channel carrying [`StorageChange`]s.
#[derive(Debug, Clone)]
pub struct StorageChannel {
    tx: broadcast::Sender<StorageChange>,
}

impl StorageChannel {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, change: StorageChange) {
        if self.tx.send(change).is_err() {
            trace!("storage change published with no listeners");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.tx.subscribe()
    }
}

impl Default for StorageChannel {
    fn default() -> Self {
        Self::new(256)
    }
}
