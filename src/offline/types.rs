//! Records held by the offline store and their retention classes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::duration_millis;
use crate::record::Priority;

/// How long a stored record is kept after its last write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Short-lived data such as feeds and lists (default 24 hours)
    #[default]
    Transient,
    /// User settings and similar (default 30 days)
    Preference,
    /// Logs and past activity (default 7 days)
    History,
    /// Explicit retention in seconds
    Custom(u64),
}

/// Durations behind each [`Retention`] class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub transient: Duration,
    pub preference: Duration,
    pub history: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            transient: Duration::from_secs(24 * 3600),
            preference: Duration::from_secs(30 * 24 * 3600),
            history: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl RetentionPolicy {
    #[must_use]
    pub fn duration(&self, retention: Retention) -> Duration {
        match retention {
            Retention::Transient => self.transient,
            Retention::Preference => self.preference,
            Retention::History => self.history,
            Retention::Custom(secs) => Duration::from_secs(secs),
        }
    }
}

/// The last known value of a key, as kept by the offline store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub payload: Value,
    pub priority: Priority,
    #[serde(default)]
    pub retention: Retention,
    /// Epoch millis of the last write
    pub stored_at: i64,
    /// Epoch millis after which the record may be purged
    pub expires_at: i64,
    /// Holds a local mutation the remote has not confirmed
    #[serde(default)]
    pub is_dirty: bool,
}

impl StoredRecord {
    pub fn new(
        key: impl Into<String>,
        payload: Value,
        priority: Priority,
        retention: Retention,
        now: i64,
        policy: &RetentionPolicy,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            priority,
            retention,
            stored_at: now,
            expires_at: now.saturating_add(duration_millis(policy.duration(retention))),
            is_dirty: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Pending-change counts per priority tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl PendingCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }

    pub(crate) fn bump(&mut self, priority: Priority) {
        match priority {
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}
