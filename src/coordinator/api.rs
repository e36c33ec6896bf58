// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Foreground operations: reads, writes, queries and sync control.

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{Fetched, Source, SyncClient, SyncStats};
use crate::cache::CacheLookup;
use crate::codec::{Decoder, Encoder, JsonCodec};
use crate::error::SyncError;
use crate::offline::Retention;
use crate::record::{CacheEntry, Priority, WriteMode};
use crate::remote::{Filter, Query, Record};
use crate::set_options::SetOptions;
use crate::sync::{SyncPhase, SyncReport, TrackedQuery};

impl SyncClient {
    /// Typed read: cache, then remote, then the offline copy.
    ///
    /// Returns `Ok(None)` when the key is absent everywhere the client could
    /// look. See [`fetch`](Self::fetch) for provenance.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SyncError> {
        Ok(self.fetch(key).await?.map(|f| f.value))
    }

    /// Typed read with provenance.
    ///
    /// ```text
    /// cache hit (memory / persistent)      → Memory / Persistent
    /// miss → remote fetch_one (retried)
    ///        ├─ found                      → Remote (stored locally)
    ///        ├─ absent                     → None
    ///        └─ error → offline record     → Offline (stale, not an error)
    ///                   no offline record  → Err
    /// ```
    pub async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Fetched<T>>, SyncError> {
        self.fetch_with(key, &JsonCodec::<T>::new()).await
    }

    /// [`fetch`](Self::fetch) with a caller-supplied codec.
    #[tracing::instrument(skip(self, codec))]
    pub async fn fetch_with<T, C: Decoder<T>>(&self, key: &str, codec: &C) -> Result<Option<Fetched<T>>, SyncError> {
        self.ensure_open()?;
        let _timer = crate::time_operation!("get");

        let raw = match self.fetch_raw(key).await {
            Ok(raw) => raw,
            Err(e) => {
                crate::metrics::record_operation("get", "error");
                return Err(e);
            }
        };
        crate::metrics::record_operation("get", if raw.is_some() { "found" } else { "missing" });

        raw.map(|fetched| -> Result<Fetched<T>, SyncError> {
            let value = codec.decode(&fetched.value).map_err(|source| SyncError::Codec {
                key: key.to_string(),
                source,
            })?;
            Ok(Fetched {
                value,
                source: fetched.source,
                cached_at: fetched.cached_at,
            })
        })
        .transpose()
    }

    async fn fetch_raw(&self, key: &str) -> Result<Option<Fetched<Value>>, SyncError> {
        match self.local.cache.lookup(key).await {
            CacheLookup::Memory(entry) => return Ok(Some(from_entry(entry, Source::Memory))),
            CacheLookup::Persistent(entry) => return Ok(Some(from_entry(entry, Source::Persistent))),
            CacheLookup::Miss => {}
        }

        let operation = format!("fetch_one {}", key);
        let result = self
            .executor
            .execute_classified(&operation, || self.remote.fetch_one(key))
            .await;

        match result {
            Ok(Some(record)) => {
                let value = self.local.store_remote(key, record.data, None, None).await?;
                Ok(Some(Fetched {
                    value,
                    source: Source::Remote,
                    cached_at: self.local.clock.now_millis(),
                }))
            }
            Ok(None) => {
                debug!(key, "Not found remotely");
                Ok(None)
            }
            Err(remote_err) => match self.local.offline.get(key).await? {
                Some(record) => {
                    warn!(key, error = %remote_err, "Remote unavailable, serving offline copy");
                    crate::metrics::record_offline_fallback();
                    Ok(Some(Fetched {
                        value: record.payload,
                        source: Source::Offline,
                        cached_at: record.stored_at,
                    }))
                }
                None => Err(remote_err.into()),
            },
        }
    }

    /// Store a value locally: both cache tiers plus the offline copy.
    ///
    /// Nothing is sent to the remote; use [`mark_dirty`](Self::mark_dirty)
    /// for mutations that must reach it.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) -> Result<(), SyncError> {
        self.set_with(key, value, &JsonCodec::<T>::new(), options).await
    }

    /// [`set`](Self::set) with a caller-supplied codec.
    #[tracing::instrument(skip(self, value, codec))]
    pub async fn set_with<T, C: Encoder<T>>(
        &self,
        key: &str,
        value: &T,
        codec: &C,
        options: SetOptions,
    ) -> Result<(), SyncError> {
        self.ensure_open()?;
        let _timer = crate::time_operation!("set");

        let payload = codec.encode(value).map_err(|source| SyncError::Codec {
            key: key.to_string(),
            source,
        })?;
        let ttl = options.ttl_or(self.config.default_ttl());
        self.local
            .store_local(key, payload, options.priority, options.retention, ttl)
            .await?;
        crate::metrics::record_operation("set", "ok");
        Ok(())
    }

    /// Record a local mutation for `key` and apply it locally.
    ///
    /// `delta` is merged into the current value (JSON merge for objects).
    /// The change is queued durably and pushed on the next sync cycle.
    pub async fn mark_dirty(&self, key: &str, delta: Value, priority: Priority) -> Result<(), SyncError> {
        let options = SetOptions::default().with_priority(priority);
        self.mark_dirty_with(key, delta, WriteMode::Merge, options).await
    }

    /// Record a full replacement of `key`.
    pub async fn replace<T: Serialize>(&self, key: &str, value: &T, priority: Priority) -> Result<(), SyncError> {
        let delta = serde_json::to_value(value).map_err(|source| SyncError::Codec {
            key: key.to_string(),
            source,
        })?;
        let options = SetOptions::default().with_priority(priority);
        self.mark_dirty_with(key, delta, WriteMode::Replace, options).await
    }

    /// [`mark_dirty`](Self::mark_dirty) with an explicit write mode, TTL and
    /// retention.
    #[tracing::instrument(skip(self, delta, options), fields(priority = %options.priority))]
    pub async fn mark_dirty_with(
        &self,
        key: &str,
        delta: Value,
        mode: WriteMode,
        options: SetOptions,
    ) -> Result<(), SyncError> {
        self.ensure_open()?;
        let _timer = crate::time_operation!("mark_dirty");

        let ttl = options.ttl_or(self.config.default_ttl());
        self.local
            .record_change(key, delta, mode, options.priority, options.retention, ttl)
            .await?;
        crate::metrics::record_operation("mark_dirty", "ok");
        Ok(())
    }

    /// Drop `key` from both cache tiers and the offline store.
    ///
    /// Refuses (returns `Ok(false)` and removes nothing) while the key has a
    /// pending change. Otherwise returns whether anything was removed.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> Result<bool, SyncError> {
        self.ensure_open()?;
        match self.local.remove(key).await? {
            Some(removed) => Ok(removed),
            None => {
                warn!(key, "Not removing a key with an unconfirmed change");
                Ok(false)
            }
        }
    }

    /// Wipe both cache tiers and the offline store, including unconfirmed
    /// changes. Irreversible; meant for logout or account switch.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), SyncError> {
        self.ensure_open()?;
        self.local.clear().await?;
        warn!("Local state cleared");
        Ok(())
    }

    /// Run a protected collection fetch and store every returned record
    /// under its path. Returned records carry the locally visible value
    /// (pending changes applied).
    #[tracing::instrument(skip(self, query), fields(collection = %query.collection_path))]
    pub async fn query(&self, query: &Query) -> Result<Vec<Record>, SyncError> {
        self.ensure_open()?;
        let _timer = crate::time_operation!("query");

        let operation = format!("fetch {}", query.collection_path);
        let records = self
            .executor
            .execute_classified(&operation, || self.remote.fetch(query))
            .await?;

        let mut visible = Vec::with_capacity(records.len());
        for record in records {
            let data = self.local.store_remote(&record.path, record.data, None, None).await?;
            visible.push(Record::new(record.path, data));
        }
        debug!(count = visible.len(), "Query stored locally");
        Ok(visible)
    }

    /// Live updates for `path` (a document or a collection), kept alive
    /// under the retry policy. Every received record is stored locally.
    ///
    /// The stream ends after yielding a terminal, exhausted or circuit-open
    /// error.
    pub fn subscribe(&self, path: &str, filters: Vec<Filter>) -> BoxStream<'static, Result<Record, SyncError>> {
        if let Err(e) = self.ensure_open() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let remote = self.remote.clone();
        let target = path.to_string();
        let upstream = self
            .executor
            .execute_stream(format!("subscribe {}", path), move || remote.subscribe(&target, &filters));

        let local = self.local.clone();
        upstream
            .then(move |item| {
                let local = local.clone();
                async move {
                    let record = item?;
                    let data = local.store_remote(&record.path, record.data, None, None).await?;
                    Ok::<_, SyncError>(Record::new(record.path, data))
                }
            })
            .boxed()
    }

    /// Refresh `query` on every full sync cycle at `priority`.
    pub fn track(&self, query: Query, priority: Priority) {
        self.orchestrator.track(query, priority);
    }

    pub fn untrack(&self, query: &Query) -> bool {
        self.orchestrator.untrack(query)
    }

    #[must_use]
    pub fn tracked(&self) -> Vec<TrackedQuery> {
        self.orchestrator.tracked()
    }

    /// Run a sync cycle now; `true` if it ran to completion.
    ///
    /// `force` ignores the strategy and Wi-Fi restrictions. Returns `false`
    /// when offline, when a cycle is already running, when the circuit is
    /// open, or after shutdown.
    pub async fn perform_sync(&self, force: bool) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.orchestrator.perform_sync(force).await
    }

    /// Queue a non-forced cycle on the background loop.
    pub fn request_sync(&self) {
        self.orchestrator.request_sync();
    }

    #[must_use]
    pub fn last_report(&self) -> Option<SyncReport> {
        self.orchestrator.last_report()
    }

    #[must_use]
    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.orchestrator.phase()
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        let cache = self.local.cache.stats();
        SyncStats {
            hits: cache.hits,
            misses: cache.misses,
            evictions: cache.evictions,
            memory_cache_size: cache.memory_items,
            persistent_items: cache.persistent_items,
            persistent_bytes: cache.persistent_bytes,
            pending_count: self.local.offline.pending_count(),
            circuit_open: self.executor.breaker().is_open(),
            last_sync_time: self.orchestrator.last_sync_time(),
        }
    }

    /// Offline retention class for `key`, if stored.
    pub async fn retention(&self, key: &str) -> Result<Option<Retention>, SyncError> {
        self.ensure_open()?;
        Ok(self.local.offline.get(key).await?.map(|r| r.retention))
    }
}

fn from_entry(entry: CacheEntry, source: Source) -> Fetched<Value> {
    Fetched {
        value: entry.payload,
        source,
        cached_at: entry.cached_at,
    }
}
