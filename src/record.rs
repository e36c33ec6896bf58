// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Core data units: cached entries and pending changes.
//!
//! A [`CacheEntry`] is what both cache tiers and the offline store hold for a
//! key. A [`PendingChange`] is one row of the offline ledger: a local mutation
//! that has not been confirmed by the remote store yet.
//!
//! # Example
//!
//! ```
//! use offline_sync::{CacheEntry, Priority};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let entry = CacheEntry::new("job_1", json!({"title": "Wire panel"}), 1_000, Duration::from_secs(60), Priority::High);
//! assert!(!entry.is_expired(61_000));
//! assert!(entry.is_expired(61_001));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::duration_millis;

/// Importance tier of an entry or pending change.
///
/// The derived ordering is drain order: `High < Medium < Low`, so sorting
/// ascending puts the most important work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a delta is applied by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Patch: object fields in the delta overwrite the stored document's fields.
    Merge,
    /// The delta is the whole new document.
    Replace,
}

/// A cached value with its freshness and sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    /// Epoch millis when the value was stored
    pub cached_at: i64,
    /// Epoch millis after which the value is stale
    pub expires_at: i64,
    #[serde(default)]
    pub priority: Priority,
    /// Locally mutated and not yet confirmed remotely
    #[serde(default)]
    pub is_dirty: bool,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: Value,
        now: i64,
        ttl: Duration,
        priority: Priority,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            cached_at: now,
            expires_at: now.saturating_add(duration_millis(ttl)),
            priority,
            is_dirty: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.cached_at)
    }

    #[must_use]
    pub fn with_dirty(mut self, dirty: bool) -> Self {
        self.is_dirty = dirty;
        self
    }
}

/// One unconfirmed local mutation in the offline ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub key: String,
    pub delta: Value,
    pub mode: WriteMode,
    /// Epoch millis of the most recent mutation folded into this change
    pub recorded_at: i64,
    pub priority: Priority,
    /// Ledger insertion sequence; preserved across merges
    pub seq: u64,
    /// Failed remote write attempts (executor calls, not individual retries)
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingChange {
    pub fn new(
        key: impl Into<String>,
        delta: Value,
        mode: WriteMode,
        priority: Priority,
        recorded_at: i64,
        seq: u64,
    ) -> Self {
        Self {
            key: key.into(),
            delta,
            mode,
            recorded_at,
            priority,
            seq,
            attempts: 0,
            last_error: None,
        }
    }

    /// Fold a later mutation of the same key into this change.
    ///
    /// Two object merge-patches combine field by field with the later value
    /// winning. Any other pair folds into a full replacement equal to
    /// applying both deltas in order. Priority only rises.
    pub fn absorb(&mut self, delta: Value, mode: WriteMode, priority: Priority, now: i64) {
        match (self.mode, mode, &mut self.delta, delta) {
            (WriteMode::Merge, WriteMode::Merge, Value::Object(queued), Value::Object(incoming)) => {
                queued.extend(incoming);
            }
            (_, mode, queued, incoming) => {
                *queued = apply_delta(Some(&*queued), &incoming, mode);
                self.mode = WriteMode::Replace;
            }
        }
        self.priority = self.priority.min(priority);
        self.recorded_at = now;
    }

    /// The value this change produces when applied on top of `base`.
    #[must_use]
    pub fn apply_to(&self, base: Option<&Value>) -> Value {
        apply_delta(base, &self.delta, self.mode)
    }

    /// Drain ordering key: priority tier first, then insertion order.
    #[must_use]
    pub fn drain_key(&self) -> (Priority, u64) {
        (self.priority, self.seq)
    }
}

/// Apply a delta to a base document with the given write mode.
#[must_use]
pub fn apply_delta(base: Option<&Value>, delta: &Value, mode: WriteMode) -> Value {
    match (mode, base, delta) {
        (WriteMode::Merge, Some(Value::Object(base)), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => delta.clone(),
    }
}
