// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt record for '{key}': {reason}")]
    Corruption { key: String, reason: String },
    #[error("Serialization failed for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Minimal local key-value contract.
///
/// Implementations never retry; a failure is reported once and the caller
/// decides whether it is fatal.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Keys beginning with `prefix`.
    /// Default implementation filters [`keys`](Self::keys).
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    /// Remove many keys. Default implementation removes one at a time and
    /// stops at the first error.
    async fn remove_many(&self, keys: &[String]) -> Result<usize, StorageError> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(keys.len())
    }
}
