//! Writes that touch both local structures at once.
//!
//! Every write that updates the offline store and the cache together goes
//! through [`LocalState`] and holds its gate for both steps. Without it a
//! refresh or a confirmation could interleave with a foreground mutation and
//! leave the cache holding an older value, or a clean flag over a change
//! that is still queued.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::cache::BoundedCache;
use crate::clock::Clock;
use crate::offline::{OfflineStore, Retention, StoredRecord};
use crate::record::{CacheEntry, PendingChange, Priority, WriteMode};
use crate::storage::StorageError;

/// The cache and offline store, updated together.
#[derive(Clone)]
pub struct LocalState {
    pub cache: Arc<BoundedCache>,
    pub offline: Arc<OfflineStore>,
    pub clock: Arc<dyn Clock>,
    gate: Arc<Mutex<()>>,
}

impl LocalState {
    pub fn new(cache: Arc<BoundedCache>, offline: Arc<OfflineStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            offline,
            clock,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Store a value read from the remote under `key`.
    ///
    /// An unconfirmed local change is re-applied on top, so a refresh never
    /// hides it. `priority` and `retention` default to the existing record's
    /// values (or `Medium`/`Transient` for a new key). A cached key keeps
    /// the TTL it was stored with; a new one gets the cache default. Returns
    /// the value now visible locally.
    pub async fn store_remote(
        &self,
        key: &str,
        remote: Value,
        priority: Option<Priority>,
        retention: Option<Retention>,
    ) -> Result<Value, StorageError> {
        let _gate = self.gate.lock().await;
        let (priority, retention) = match (priority, retention) {
            (Some(p), Some(r)) => (p, r),
            (p, r) => {
                let existing = self.offline.get(key).await?;
                (
                    p.or_else(|| existing.as_ref().map(|e| e.priority)).unwrap_or_default(),
                    r.or_else(|| existing.as_ref().map(|e| e.retention)).unwrap_or_default(),
                )
            }
        };
        let value = self.offline.rebase(key, remote);
        let record = self.offline.put(key, value.clone(), priority, retention).await?;

        let ttl = self
            .cache
            .ttl_span(key)
            .unwrap_or(self.cache.config().default_ttl);
        self.cache_record(&record, ttl).await;
        Ok(value)
    }

    /// Store a locally produced value. Nothing is queued for the remote; a
    /// change already queued for `key` is re-applied on top.
    pub async fn store_local(
        &self,
        key: &str,
        payload: Value,
        priority: Priority,
        retention: Retention,
        ttl: Duration,
    ) -> Result<StoredRecord, StorageError> {
        let _gate = self.gate.lock().await;
        let payload = self.offline.rebase(key, payload);
        let record = self.offline.put(key, payload, priority, retention).await?;
        self.cache_record(&record, ttl).await;
        Ok(record)
    }

    /// Queue a mutation and make its result visible locally.
    pub async fn record_change(
        &self,
        key: &str,
        delta: Value,
        mode: WriteMode,
        priority: Priority,
        retention: Retention,
        ttl: Duration,
    ) -> Result<(StoredRecord, PendingChange), StorageError> {
        let _gate = self.gate.lock().await;
        let (record, change) = self.offline.mark_dirty(key, delta, mode, priority, retention).await?;
        self.cache_record(&record, ttl).await;
        Ok((record, change))
    }

    /// Confirm that `sent` reached the remote. The cached copy is marked
    /// clean only when the ledger entry was actually removed. Returns
    /// whether it was.
    pub async fn confirm(&self, sent: &PendingChange) -> Result<bool, StorageError> {
        let _gate = self.gate.lock().await;
        let removed = self.offline.acknowledge(sent).await?;
        if removed {
            self.cache.set_dirty(&sent.key, false).await;
        }
        Ok(removed)
    }

    /// Drop `key` from both structures. `None` when the key has a pending
    /// change and nothing was removed; otherwise whether anything was there.
    pub async fn remove(&self, key: &str) -> Result<Option<bool>, StorageError> {
        let _gate = self.gate.lock().await;
        if self.offline.has_pending(key) {
            return Ok(None);
        }
        let stored = self.offline.remove(key).await?;
        let cached = self.cache.remove(key).await;
        Ok(Some(stored || cached))
    }

    /// Wipe both structures, pending changes included.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _gate = self.gate.lock().await;
        self.cache.clear().await?;
        self.offline.clear().await
    }

    async fn cache_record(&self, record: &StoredRecord, ttl: Duration) {
        let entry = CacheEntry::new(
            record.key.clone(),
            record.payload.clone(),
            self.clock.now_millis(),
            ttl,
            record.priority,
        )
        .with_dirty(record.is_dirty);
        self.cache.set(entry).await;
    }
}
