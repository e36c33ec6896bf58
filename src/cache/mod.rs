// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-tier bounded cache.
//!
//! ```text
//! get(key)
//!   ├─ memory tier (LruMap, max_memory_items)   hit → touch, return
//!   ├─ persistent tier (KvStore "cache:" keys)  hit → promote, return
//!   └─ miss
//!
//! set(entry)
//!   ├─ memory tier: evict least recently used when full
//!   └─ persistent tier: write, then evict oldest cached_at while over max_bytes
//! ```
//!
//! The persistent tier keeps an in-memory index of entry sizes and
//! timestamps, loaded once at [`BoundedCache::open`], so size enforcement and
//! sweeps never read payloads back from disk.
//!
//! Storage failures on the persistent tier are logged and counted but never
//! surfaced from `get`/`set`: the memory tier keeps working on its own.
//!
//! Every mutation holds the write gate from its first read to its last
//! write, so a read-modify-write such as [`BoundedCache::set_dirty`] never
//! puts back a payload another writer has replaced.

mod types;

pub use types::{CacheConfig, CacheLookup, CacheStats};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::eviction::{select_size_victims, select_sweep_victims, EvictionCandidate, LruMap};
use crate::record::CacheEntry;
use crate::storage::{KvStore, StorageError};

/// Key prefix of persisted cache entries.
pub const CACHE_PREFIX: &str = "cache:";

fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
}

#[derive(Debug, Clone, Copy)]
struct IndexMeta {
    size_bytes: usize,
    cached_at: i64,
    expires_at: i64,
    is_dirty: bool,
}

impl IndexMeta {
    fn of(entry: &CacheEntry, size_bytes: usize) -> Self {
        Self {
            size_bytes,
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
            is_dirty: entry.is_dirty,
        }
    }
}

#[derive(Debug, Default)]
struct PersistentIndex {
    entries: HashMap<String, IndexMeta>,
    total_bytes: usize,
}

impl PersistentIndex {
    fn upsert(&mut self, key: String, meta: IndexMeta) {
        if let Some(old) = self.entries.insert(key, meta) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.total_bytes = self.total_bytes.saturating_add(meta.size_bytes);
    }

    fn remove(&mut self, key: &str) -> Option<IndexMeta> {
        let meta = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(meta.size_bytes);
        Some(meta)
    }

    fn candidates(&self) -> Vec<EvictionCandidate> {
        self.entries
            .iter()
            .map(|(key, m)| EvictionCandidate {
                key: key.clone(),
                size_bytes: m.size_bytes,
                cached_at: m.cached_at,
                expires_at: m.expires_at,
                is_dirty: m.is_dirty,
            })
            .collect()
    }
}

pub struct BoundedCache {
    config: CacheConfig,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    memory: Mutex<LruMap<String, CacheEntry>>,
    index: Mutex<PersistentIndex>,
    write_gate: AsyncMutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BoundedCache {
    /// Open the cache and index whatever the persistent tier already holds.
    ///
    /// Entries that fail to parse are deleted.
    pub async fn open(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Result<Self, StorageError> {
        let mut index = PersistentIndex::default();
        let mut corrupt = Vec::new();

        for skey in kv.keys_with_prefix(CACHE_PREFIX).await? {
            let Some(raw) = kv.get_string(&skey).await? else {
                continue;
            };
            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    let key = skey[CACHE_PREFIX.len()..].to_string();
                    index.upsert(key, IndexMeta::of(&entry, raw.len()));
                }
                Err(e) => {
                    warn!(key = %skey, error = %e, "Dropping unreadable cache entry");
                    corrupt.push(skey);
                }
            }
        }
        if !corrupt.is_empty() {
            kv.remove_many(&corrupt).await?;
        }

        info!(
            items = index.entries.len(),
            bytes = index.total_bytes,
            "Persistent cache tier loaded"
        );
        crate::metrics::set_persistent_usage(index.total_bytes, index.entries.len());

        Ok(Self {
            memory: Mutex::new(LruMap::with_capacity(config.max_memory_items)),
            index: Mutex::new(index),
            write_gate: AsyncMutex::new(()),
            config,
            kv,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a key in memory, then on disk. Never returns an expired entry.
    pub async fn lookup(&self, key: &str) -> CacheLookup {
        let now = self.clock.now_millis();

        {
            let mut memory = self.memory.lock();
            let key = key.to_string();
            match memory.get(&key).cloned() {
                Some(entry) if !entry.is_expired(now) => {
                    drop(memory);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_cache_lookup("memory", true);
                    return CacheLookup::Memory(entry);
                }
                Some(_) => {
                    memory.remove(&key);
                }
                None => {}
            }
        }
        crate::metrics::record_cache_lookup("memory", false);

        match self.load_persistent(key, now).await {
            Some(entry) => {
                self.promote(entry.clone());
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("persistent", true);
                CacheLookup::Persistent(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup("persistent", false);
                CacheLookup::Miss
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.lookup(key).await.into_entry()
    }

    async fn load_persistent(&self, key: &str, now: i64) -> Option<CacheEntry> {
        let meta = self.index.lock().entries.get(key).copied()?;
        if now > meta.expires_at {
            if !meta.is_dirty {
                self.drop_expired(key, now).await;
            }
            return None;
        }

        let raw = match self.kv.get_string(&storage_key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.index.lock().remove(key);
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Persistent cache read failed");
                crate::metrics::record_storage_error("cache", "read");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if !entry.is_expired(now) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable cache entry");
                self.drop_unreadable(key).await;
                None
            }
        }
    }

    async fn drop_expired(&self, key: &str, now: i64) {
        let _gate = self.write_gate.lock().await;
        let stale = self
            .index
            .lock()
            .entries
            .get(key)
            .is_some_and(|m| !m.is_dirty && now > m.expires_at);
        if stale {
            self.remove_persistent(key).await;
        }
    }

    async fn drop_unreadable(&self, key: &str) {
        let _gate = self.write_gate.lock().await;
        if let Ok(Some(raw)) = self.kv.get_string(&storage_key(key)).await {
            if serde_json::from_str::<CacheEntry>(&raw).is_err() {
                self.remove_persistent(key).await;
            }
        }
    }

    fn promote(&self, entry: CacheEntry) {
        let evicted = {
            let mut memory = self.memory.lock();
            Self::insert_bounded(&mut memory, self.config.max_memory_items, entry)
        };
        self.note_memory_evictions(evicted);
    }

    /// Insert into the LRU tier, evicting least recently used entries first.
    fn insert_bounded(memory: &mut LruMap<String, CacheEntry>, max_items: usize, entry: CacheEntry) -> Vec<String> {
        let mut evicted = Vec::new();
        if max_items == 0 {
            return evicted;
        }
        if !memory.contains_key(&entry.key) {
            while memory.len() >= max_items {
                match memory.pop_lru() {
                    Some((key, _)) => evicted.push(key),
                    None => break,
                }
            }
        }
        memory.insert(entry.key.clone(), entry);
        evicted
    }

    fn note_memory_evictions(&self, evicted: Vec<String>) {
        if evicted.is_empty() {
            return;
        }
        self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
        crate::metrics::record_evictions("memory", evicted.len(), 0);
        debug!(evicted = ?evicted, "Evicted least recently used entries from memory tier");
    }

    /// Store in both tiers.
    pub async fn set(&self, entry: CacheEntry) {
        let _gate = self.write_gate.lock().await;
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Cache entry not serializable, keeping in memory only");
                self.promote(entry);
                return;
            }
        };
        let key = entry.key.clone();
        let meta = IndexMeta::of(&entry, raw.len());
        self.promote(entry);

        if let Err(e) = self.kv.set_string(&storage_key(&key), &raw).await {
            warn!(key = %key, error = %e, "Persistent cache write failed");
            crate::metrics::record_storage_error("cache", "write");
            return;
        }
        self.index.lock().upsert(key, meta);
        self.enforce_size().await;
    }

    /// Evict persisted entries until the tier is back under its byte ceiling.
    async fn enforce_size(&self) {
        let victims = {
            let index = self.index.lock();
            select_size_victims(
                &index.candidates(),
                index.total_bytes,
                self.config.max_bytes,
                self.config.eviction_buffer_bytes,
            )
        };
        if victims.is_empty() {
            return;
        }

        let mut freed = 0usize;
        for key in &victims {
            freed += self.remove_persistent(key).await;
        }
        self.evictions.fetch_add(victims.len() as u64, Ordering::Relaxed);
        crate::metrics::record_evictions("persistent", victims.len(), freed);
        info!(count = victims.len(), freed_bytes = freed, "Persistent cache over size limit, evicted oldest entries");
    }

    /// Delete a persisted entry, returning the bytes it occupied. Callers
    /// hold the write gate.
    async fn remove_persistent(&self, key: &str) -> usize {
        if let Err(e) = self.kv.remove(&storage_key(key)).await {
            warn!(key, error = %e, "Persistent cache delete failed");
            crate::metrics::record_storage_error("cache", "delete");
            return 0;
        }
        let removed = self.index.lock().remove(key);
        self.publish_usage();
        removed.map_or(0, |m| m.size_bytes)
    }

    fn publish_usage(&self) {
        let index = self.index.lock();
        crate::metrics::set_persistent_usage(index.total_bytes, index.entries.len());
    }

    /// Flip the dirty flag on whatever copies exist. Returns false when the
    /// key is in neither tier.
    pub async fn set_dirty(&self, key: &str, dirty: bool) -> bool {
        let _gate = self.write_gate.lock().await;
        let in_memory = {
            let mut memory = self.memory.lock();
            match memory.peek_mut(&key.to_string()) {
                Some(entry) => {
                    entry.is_dirty = dirty;
                    true
                }
                None => false,
            }
        };

        let skey = storage_key(key);
        let raw = match self.kv.get_string(&skey).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return in_memory,
            Err(e) => {
                warn!(key, error = %e, "Persistent cache read failed");
                crate::metrics::record_storage_error("cache", "read");
                return in_memory;
            }
        };
        let Ok(mut entry) = serde_json::from_str::<CacheEntry>(&raw) else {
            return in_memory;
        };
        if entry.is_dirty == dirty {
            return true;
        }
        entry.is_dirty = dirty;
        let Ok(raw) = serde_json::to_string(&entry) else {
            return in_memory;
        };
        if let Err(e) = self.kv.set_string(&skey, &raw).await {
            warn!(key, error = %e, "Persistent cache write failed");
            crate::metrics::record_storage_error("cache", "write");
            return in_memory;
        }
        self.index.lock().upsert(key.to_string(), IndexMeta::of(&entry, raw.len()));
        true
    }

    /// Remove a key from both tiers. Returns whether anything was removed.
    pub async fn remove(&self, key: &str) -> bool {
        let _gate = self.write_gate.lock().await;
        let in_memory = self.memory.lock().remove(&key.to_string()).is_some();
        let indexed = self.index.lock().entries.contains_key(key);
        if indexed {
            self.remove_persistent(key).await;
        }
        in_memory || indexed
    }

    /// Remove expired entries from both tiers, and persisted entries older
    /// than `max_age`. Dirty entries are kept. Returns the number removed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> usize {
        let _gate = self.write_gate.lock().await;
        let now = self.clock.now_millis();

        let from_memory = self
            .memory
            .lock()
            .retain(|_, entry| entry.is_dirty || !entry.is_expired(now));

        let victims = {
            let index = self.index.lock();
            select_sweep_victims(&index.candidates(), now, self.config.max_age)
        };
        for key in &victims {
            self.remove_persistent(key).await;
        }

        let removed = from_memory + victims.len();
        if removed > 0 {
            info!(memory = from_memory, persistent = victims.len(), "Cache sweep removed stale entries");
        }
        removed
    }

    /// Wipe both tiers.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        self.memory.lock().clear();
        let keys = self.kv.keys_with_prefix(CACHE_PREFIX).await?;
        self.kv.remove_many(&keys).await?;
        *self.index.lock() = PersistentIndex::default();
        self.publish_usage();
        info!(removed = keys.len(), "Cache cleared");
        Ok(())
    }

    /// The TTL `key` was cached with, from whichever tier holds it.
    #[must_use]
    pub fn ttl_span(&self, key: &str) -> Option<Duration> {
        let span = |cached_at: i64, expires_at: i64| {
            Duration::from_millis(u64::try_from(expires_at.saturating_sub(cached_at)).unwrap_or(0))
        };
        if let Some(entry) = self.memory.lock().peek(&key.to_string()) {
            return Some(span(entry.cached_at, entry.expires_at));
        }
        self.index
            .lock()
            .entries
            .get(key)
            .map(|m| span(m.cached_at, m.expires_at))
    }

    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }

    /// Keys in the memory tier, least recently used first.
    #[must_use]
    pub fn memory_keys(&self) -> Vec<String> {
        self.memory.lock().keys_lru_first()
    }

    #[must_use]
    pub fn persistent_bytes(&self) -> usize {
        self.index.lock().total_bytes
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (persistent_items, persistent_bytes) = {
            let index = self.index.lock();
            (index.entries.len(), index.total_bytes)
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            memory_items: self.memory_len(),
            persistent_items,
            persistent_bytes,
        }
    }
}
