// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Trackers of one execution context, keyed by app key.
//!
//! The first tracker registered becomes the global one: it drains the
//! command queue and receives untargeted commands.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::channel::{ContextId, StorageChannel};
use crate::coordinator::{Command, CommandQueue, Tracker};

pub struct Registry {
    trackers: DashMap<String, Tracker>,
    global: RwLock<Option<String>>,
    commands: CommandQueue,
    channel: StorageChannel,
    context: ContextId,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry with its own storage channel.
    #[must_use]
    pub fn new() -> Self {
        Self::attached(StorageChannel::default())
    }

    /// A new context sharing `channel` with other registries.
    #[must_use]
    pub fn attached(channel: StorageChannel) -> Self {
        Self {
            trackers: DashMap::new(),
            global: RwLock::new(None),
            commands: CommandQueue::new(),
            channel,
            context: ContextId::next(),
        }
    }

    #[must_use]
    pub fn channel(&self) -> &StorageChannel {
        &self.channel
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Add a tracker, replacing any previous one with the same app key.
    pub fn register(&self, tracker: Tracker) {
        let app_key = tracker.app_key().to_string();
        {
            let mut global = self.global.write();
            if global.is_none() {
                info!(app_key = %app_key, "global tracker registered");
                *global = Some(app_key.clone());
            }
        }
        if self.trackers.insert(app_key.clone(), tracker).is_some() {
            debug!(app_key = %app_key, "tracker replaced");
        }
    }

    pub fn unregister(&self, app_key: &str) -> Option<Tracker> {
        let removed = self.trackers.remove(app_key).map(|(_, t)| t);
        let mut global = self.global.write();
        if global.as_deref() == Some(app_key) {
            *global = None;
        }
        removed
    }

    #[must_use]
    pub fn get(&self, app_key: &str) -> Option<Tracker> {
        self.trackers.get(app_key).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn global(&self) -> Option<Tracker> {
        let key = self.global.read().clone()?;
        self.get(&key)
    }

    #[must_use]
    pub fn is_global(&self, app_key: &str) -> bool {
        self.global.read().as_deref() == Some(app_key)
    }

    /// Registered app keys, sorted.
    #[must_use]
    pub fn app_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.trackers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    #[must_use]
    pub fn command_queue(&self) -> &CommandQueue {
        &self.commands
    }

    /// Queue a command for the next heartbeat of the global tracker.
    pub fn push_command(&self, command: Command) {
        self.commands.push(command);
    }

    /// Record one error on every registered tracker.
    ///
    /// Returns how many trackers queued a crash report.
    pub async fn dispatch_error(&self, message: &str, nonfatal: bool, segments: Option<Map<String, Value>>) -> usize {
        // Clone out first; no map guard may be held across an await.
        let trackers: Vec<Tracker> = self.trackers.iter().map(|e| e.value().clone()).collect();
        let mut recorded = 0;
        for tracker in trackers {
            if tracker.record_error(message, nonfatal, segments.clone()).await {
                recorded += 1;
            }
        }
        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_distinct() {
        let channel = StorageChannel::default();
        let a = Registry::attached(channel.clone());
        let b = Registry::attached(channel);
        assert_ne!(a.context(), b.context());
    }

    #[test]
    fn test_empty_registry() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert!(registry.global().is_none());
        assert!(!registry.is_global("app"));
        assert!(registry.unregister("app").is_none());
    }

    #[test]
    fn test_push_command() {
        let registry = Registry::new();
        registry.push_command(Command::global(crate::coordinator::CommandAction::OptOut));
        assert_eq!(registry.command_queue().len(), 1);
    }
}
