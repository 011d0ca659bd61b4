// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routes storage changes from other contexts to the matching tracker.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::channel::StorageChange;
use super::registry::Registry;

pub struct SyncListener {
    registry: Arc<Registry>,
}

impl SyncListener {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Listen on the registry's channel until it closes. Abort the handle to
    /// stop earlier.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut rx = self.registry.channel().subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        self.apply(&change).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "storage listener lagged, changes skipped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("storage channel closed, listener exiting");
                        break;
                    }
                }
            }
        })
    }

    /// Apply one change. Changes from this context, malformed keys and
    /// unknown app keys are ignored.
    pub async fn apply(&self, change: &StorageChange) -> bool {
        if change.origin == self.registry.context() {
            return false;
        }
        let Some((app_key, logical)) = change.key_parts() else {
            return false;
        };
        let Some(tracker) = self.registry.get(app_key) else {
            return false;
        };
        tracker.on_storage_change(logical, change.new_value.as_deref()).await
    }
}
