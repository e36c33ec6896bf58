// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable last-known values plus the pending-change ledger.
//!
//! Layout in the key-value store:
//!
//! | Key | Value |
//! |-----|-------|
//! | `offline:rec:{key}` | [`StoredRecord`] JSON |
//! | `offline:pending:{key}` | [`PendingChange`] JSON |
//!
//! The ledger is loaded into memory at [`OfflineStore::open`] and written
//! through on every change, so a mutation recorded with
//! [`mark_dirty`](OfflineStore::mark_dirty) survives a restart until
//! [`acknowledge`](OfflineStore::acknowledge) confirms it.
//!
//! # Invariants
//!
//! - A record with `is_dirty = true` has a ledger entry.
//! - A ledger entry is removed only by `acknowledge` (or `clear`).
//! - At most one ledger entry per key; later mutations merge into it.
//!
//! The store never retries. Storage failures propagate to the caller.

mod types;

pub use types::{PendingCounts, Retention, RetentionPolicy, StoredRecord};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::record::{apply_delta, PendingChange, Priority, WriteMode};
use crate::storage::{KvStore, StorageError};

pub const RECORD_PREFIX: &str = "offline:rec:";
pub const PENDING_PREFIX: &str = "offline:pending:";

fn record_key(key: &str) -> String {
    format!("{}{}", RECORD_PREFIX, key)
}

fn pending_key(key: &str) -> String {
    format!("{}{}", PENDING_PREFIX, key)
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|source| StorageError::Serialization {
        key: key.to_string(),
        source,
    })
}

#[derive(Debug, Clone, Copy)]
struct RecordMeta {
    priority: Priority,
    expires_at: i64,
    is_dirty: bool,
}

impl From<&StoredRecord> for RecordMeta {
    fn from(r: &StoredRecord) -> Self {
        Self {
            priority: r.priority,
            expires_at: r.expires_at,
            is_dirty: r.is_dirty,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    changes: HashMap<String, PendingChange>,
    next_seq: u64,
}

pub struct OfflineStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    retention: RetentionPolicy,
    ledger: Mutex<Ledger>,
    records: Mutex<HashMap<String, RecordMeta>>,
    /// Serializes read-modify-write sequences that span an `.await`
    write_gate: tokio::sync::Mutex<()>,
}

impl OfflineStore {
    /// Open the store, loading the ledger and the record index.
    ///
    /// Unreadable ledger rows are left in place and reported; they are never
    /// silently deleted.
    pub async fn open(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        retention: RetentionPolicy,
    ) -> Result<Self, StorageError> {
        let mut ledger = Ledger::default();
        for skey in kv.keys_with_prefix(PENDING_PREFIX).await? {
            let Some(raw) = kv.get_string(&skey).await? else {
                continue;
            };
            match serde_json::from_str::<PendingChange>(&raw) {
                Ok(change) => {
                    ledger.next_seq = ledger.next_seq.max(change.seq + 1);
                    ledger.changes.insert(change.key.clone(), change);
                }
                Err(e) => error!(key = %skey, error = %e, "Unreadable pending change left in place"),
            }
        }

        let mut records = HashMap::new();
        for skey in kv.keys_with_prefix(RECORD_PREFIX).await? {
            let Some(raw) = kv.get_string(&skey).await? else {
                continue;
            };
            match serde_json::from_str::<StoredRecord>(&raw) {
                Ok(record) => {
                    records.insert(record.key.clone(), RecordMeta::from(&record));
                }
                Err(e) => {
                    warn!(key = %skey, error = %e, "Dropping unreadable offline record");
                    kv.remove(&skey).await?;
                }
            }
        }

        info!(
            pending = ledger.changes.len(),
            records = records.len(),
            "Offline store opened"
        );
        crate::metrics::set_pending_depth(ledger.changes.len());

        Ok(Self {
            kv,
            clock,
            retention,
            ledger: Mutex::new(ledger),
            records: Mutex::new(records),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn retention_policy(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Last known value of `key`. Records past their retention are treated
    /// as absent unless they hold an unconfirmed mutation.
    pub async fn get(&self, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        let Some(raw) = self.kv.get_string(&record_key(key)).await? else {
            return Ok(None);
        };
        let record: StoredRecord = serde_json::from_str(&raw).map_err(|e| StorageError::Corruption {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if record.is_expired(self.clock.now_millis()) && !record.is_dirty {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Store a value confirmed by (or destined to be compared with) the
    /// remote. An outstanding pending change keeps the record dirty.
    pub async fn put(
        &self,
        key: &str,
        payload: Value,
        priority: Priority,
        retention: Retention,
    ) -> Result<StoredRecord, StorageError> {
        let _gate = self.write_gate.lock().await;
        let mut record = StoredRecord::new(
            key,
            payload,
            priority,
            retention,
            self.clock.now_millis(),
            &self.retention,
        );
        record.is_dirty = self.ledger.lock().changes.contains_key(key);
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn write_record(&self, record: &StoredRecord) -> Result<(), StorageError> {
        let raw = encode(&record.key, record)?;
        self.kv.set_string(&record_key(&record.key), &raw).await?;
        self.records.lock().insert(record.key.clone(), RecordMeta::from(record));
        Ok(())
    }

    /// Apply a local mutation: update the stored value and append to (or
    /// merge into) the ledger.
    ///
    /// The ledger row is written before the record so a crash in between
    /// leaves the change queued rather than lost.
    #[tracing::instrument(skip(self, delta))]
    pub async fn mark_dirty(
        &self,
        key: &str,
        delta: Value,
        mode: WriteMode,
        priority: Priority,
        retention: Retention,
    ) -> Result<(StoredRecord, PendingChange), StorageError> {
        let _gate = self.write_gate.lock().await;
        let now = self.clock.now_millis();

        let change = {
            let ledger = self.ledger.lock();
            match ledger.changes.get(key) {
                Some(existing) => {
                    let mut merged = existing.clone();
                    merged.absorb(delta.clone(), mode, priority, now);
                    merged
                }
                None => PendingChange::new(key, delta.clone(), mode, priority, now, ledger.next_seq),
            }
        };
        self.kv.set_string(&pending_key(key), &encode(key, &change)?).await?;

        let depth = {
            let mut ledger = self.ledger.lock();
            if change.seq >= ledger.next_seq {
                ledger.next_seq = change.seq + 1;
            }
            ledger.changes.insert(key.to_string(), change.clone());
            ledger.changes.len()
        };
        crate::metrics::set_pending_depth(depth);

        let previous = self.get(key).await?;
        let base = previous.as_ref().map(|r| &r.payload);
        let record_priority = previous.as_ref().map_or(change.priority, |r| r.priority.min(change.priority));
        let record_retention = previous.as_ref().map_or(retention, |r| r.retention);
        let mut record = StoredRecord::new(
            key,
            apply_delta(base, &delta, mode),
            record_priority,
            record_retention,
            now,
            &self.retention,
        );
        record.is_dirty = true;
        self.write_record(&record).await?;

        debug!(seq = change.seq, priority = %change.priority, "Pending change recorded");
        Ok((record, change))
    }

    /// The value the remote will hold once the pending change for `key` (if
    /// any) is applied on top of `remote`.
    #[must_use]
    pub fn rebase(&self, key: &str, remote: Value) -> Value {
        match self.ledger.lock().changes.get(key) {
            Some(change) => change.apply_to(Some(&remote)),
            None => remote,
        }
    }

    /// Confirm that `sent` reached the remote.
    ///
    /// The ledger entry is removed only if it still holds exactly what was
    /// sent. If another mutation merged into it meanwhile it stays queued.
    /// Returns whether the entry was removed.
    pub async fn acknowledge(&self, sent: &PendingChange) -> Result<bool, StorageError> {
        let _gate = self.write_gate.lock().await;
        let key = sent.key.as_str();

        let unchanged = self
            .ledger
            .lock()
            .changes
            .get(key)
            .is_some_and(|current| current.delta == sent.delta && current.mode == sent.mode);
        if !unchanged {
            debug!(key, "Pending change superseded while in flight, keeping it queued");
            return Ok(false);
        }

        self.kv.remove(&pending_key(key)).await?;
        let depth = {
            let mut ledger = self.ledger.lock();
            ledger.changes.remove(key);
            ledger.changes.len()
        };
        crate::metrics::set_pending_depth(depth);

        if let Some(mut record) = self.get(key).await? {
            if record.is_dirty {
                record.is_dirty = false;
                self.write_record(&record).await?;
            }
        }
        Ok(true)
    }

    /// Count a failed remote write against a pending change.
    pub async fn record_failure(&self, key: &str, reason: &str) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        let updated = {
            let mut ledger = self.ledger.lock();
            match ledger.changes.get_mut(key) {
                Some(change) => {
                    change.attempts = change.attempts.saturating_add(1);
                    change.last_error = Some(reason.to_string());
                    change.clone()
                }
                None => return Ok(()),
            }
        };
        self.kv.set_string(&pending_key(key), &encode(key, &updated)?).await
    }

    #[must_use]
    pub fn pending(&self, key: &str) -> Option<PendingChange> {
        self.ledger.lock().changes.get(key).cloned()
    }

    #[must_use]
    pub fn has_pending(&self, key: &str) -> bool {
        self.ledger.lock().changes.contains_key(key)
    }

    /// Every pending change in drain order: High before Medium before Low,
    /// insertion order within a tier.
    #[must_use]
    pub fn pending_sorted(&self) -> Vec<PendingChange> {
        let mut all: Vec<PendingChange> = self.ledger.lock().changes.values().cloned().collect();
        all.sort_by_key(PendingChange::drain_key);
        all
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.ledger.lock().changes.len()
    }

    #[must_use]
    pub fn pending_counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for change in self.ledger.lock().changes.values() {
            counts.bump(change.priority);
        }
        counts
    }

    /// Keys of live stored records in `priority`, sorted.
    #[must_use]
    pub fn keys_by_priority(&self, priority: Priority) -> Vec<String> {
        let now = self.clock.now_millis();
        let mut keys: Vec<String> = self
            .records
            .lock()
            .iter()
            .filter(|(_, m)| m.priority == priority && (m.is_dirty || now <= m.expires_at))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Delete records past their retention. Dirty records and records with
    /// a pending change are kept. Returns the number deleted.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let _gate = self.write_gate.lock().await;
        let now = self.clock.now_millis();
        let expired: Vec<String> = {
            let ledger = self.ledger.lock();
            self.records
                .lock()
                .iter()
                .filter(|(k, m)| !m.is_dirty && now > m.expires_at && !ledger.changes.contains_key(*k))
                .map(|(k, _)| k.clone())
                .collect()
        };

        for key in &expired {
            self.kv.remove(&record_key(key)).await?;
            self.records.lock().remove(key);
        }
        if !expired.is_empty() {
            info!(purged = expired.len(), "Purged expired offline records");
        }
        Ok(expired.len())
    }

    /// Delete a stored record. Refuses (returns `false`) while the key has a
    /// pending change.
    pub async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let _gate = self.write_gate.lock().await;
        if self.ledger.lock().changes.contains_key(key) {
            warn!(key, "Refusing to remove a key with an unconfirmed change");
            return Ok(false);
        }
        let existed = self.records.lock().remove(key).is_some();
        self.kv.remove(&record_key(key)).await?;
        Ok(existed)
    }

    /// Wipe every record and the whole ledger. Irreversible.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        let mut keys = self.kv.keys_with_prefix(RECORD_PREFIX).await?;
        keys.extend(self.kv.keys_with_prefix(PENDING_PREFIX).await?);
        self.kv.remove_many(&keys).await?;

        let dropped = {
            let mut ledger = self.ledger.lock();
            let dropped = ledger.changes.len();
            ledger.changes.clear();
            dropped
        };
        self.records.lock().clear();
        crate::metrics::set_pending_depth(0);
        if dropped > 0 {
            warn!(dropped, "Offline store cleared with unconfirmed changes");
        } else {
            info!("Offline store cleared");
        }
        Ok(())
    }
}
