// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Storage is unavailable")]
    Unavailable,
}

/// A string key-value store.
///
/// Implementations hold already-serialized strings; namespacing and
/// (de)serialization happen in [`super::KvStore`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
