// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Native persistent storage on SQLite.
//!
//! One table, one row per key:
//! ```sql
//! CREATE TABLE kv_store (
//!   key TEXT PRIMARY KEY,
//!   value TEXT NOT NULL
//! )
//! ```

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use super::traits::{StorageBackend, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqliteBackend {
    pool: AnyPool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// Uses startup-mode retry so a bad path fails fast.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        install_drivers();

        let url = format!("sqlite:{}?mode=rwc", path);
        let pool = retry("sqlite_open", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let backend = Self { pool };
        backend.enable_wal_mode().await?;
        backend.init_schema().await?;
        debug!(path, "native storage opened");
        Ok(backend)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to create kv_store: {}", e)))?;
        Ok(())
    }

    /// Number of stored keys.
    #[cfg(test)]
    pub async fn count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_store")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.try_get::<i64, _>("n")
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => row
                .try_get::<String, _>("value")
                .map(Some)
                .map_err(|e| StorageError::Backend(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (SqliteBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.db");
        let backend = SqliteBackend::open(path.to_str().unwrap()).await.unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let (store, _dir) = open_temp().await;

        store.set_item("app/cly_queue", "[]").await.unwrap();
        assert_eq!(store.get_item("app/cly_queue").await.unwrap().as_deref(), Some("[]"));

        store.set_item("app/cly_queue", "[1]").await.unwrap();
        assert_eq!(store.get_item("app/cly_queue").await.unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.count().await.unwrap(), 1);

        store.remove_item("app/cly_queue").await.unwrap();
        assert!(store.get_item("app/cly_queue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon.db");
        let path = path.to_str().unwrap();

        let first = SqliteBackend::open(path).await.unwrap();
        first.set_item("app/cly_id", "0042").await.unwrap();
        first.close().await;

        let second = SqliteBackend::open(path).await.unwrap();
        assert_eq!(second.get_item("app/cly_id").await.unwrap().as_deref(), Some("0042"));
    }
}
