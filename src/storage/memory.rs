// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{KvStore, StorageError};

/// Process-local [`KvStore`].
///
/// Survives "restarts" only as long as the same instance is shared (tests hand
/// one `Arc<InMemoryKv>` to successive stores to simulate a relaunch).
pub struct InMemoryKv {
    data: DashMap<String, String>,
}

impl InMemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total bytes of stored values (keys excluded).
    #[must_use]
    pub fn value_bytes(&self) -> usize {
        self.data.iter().map(|r| r.value().len()).sum()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.iter().map(|r| r.key().clone()).collect())
    }
}
