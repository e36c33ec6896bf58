// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed key-value store.
//!
//! One table holds everything the cache and offline store persist:
//! ```sql
//! CREATE TABLE kv_store (
//!   entry_key   TEXT PRIMARY KEY,
//!   entry_value TEXT NOT NULL,
//!   updated_at  INTEGER NOT NULL
//! )
//! ```
//!
//! The database runs in WAL journal mode so foreground reads are not blocked
//! by background sweeps and sync writes.

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::traits::{KvStore, StorageError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct SqliteKv {
    pool: AnyPool,
    path: String,
}

impl SqliteKv {
    /// Open (creating if needed) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}?mode=rwc", path);
        Self::connect(&url, path).await
    }

    /// Open from a full connection string (e.g. `sqlite::memory:`).
    pub async fn connect(url: &str, display_path: impl Into<String>) -> Result<Self, StorageError> {
        install_drivers();

        let pool = AnyPoolOptions::new()
            // SQLite serializes writers anyway; one connection also keeps
            // `sqlite::memory:` databases coherent.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(backend)?;

        let store = Self {
            pool,
            path: display_path.into(),
        };
        store.enable_wal_mode().await?;
        store.init_schema().await?;

        info!(path = %store.path, "Local key-value store opened");
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                entry_key TEXT PRIMARY KEY,
                entry_value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    /// Reclaim space after large deletions.
    pub async fn checkpoint(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("WAL checkpoint failed: {}", e)))?;
        debug!(path = %self.path, "KV checkpoint completed");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT entry_value FROM kv_store WHERE entry_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                // TEXT comes back as String on SQLite, but fall back to bytes
                let value = row
                    .try_get::<String, _>("entry_value")
                    .or_else(|_| {
                        row.try_get::<Vec<u8>, _>("entry_value")
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    })
                    .map_err(|e| StorageError::Corruption {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_store (entry_key, entry_value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(entry_key) DO UPDATE SET
                entry_value = excluded.entry_value,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE entry_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT entry_key FROM kv_store")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("entry_key").map_err(backend))
            .collect()
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // substr avoids LIKE wildcard escaping for keys containing '%' or '_'
        let rows = sqlx::query("SELECT entry_key FROM kv_store WHERE substr(entry_key, 1, ?) = ?")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("entry_key").map_err(backend))
            .collect()
    }
}
