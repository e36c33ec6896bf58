//! Options for caller-controlled local writes.
//!
//! The client decides nothing about lifetime or importance on its own: the
//! caller tags each value with a TTL (how long the cache trusts it), a
//! [`Priority`] (when sync refreshes it) and a [`Retention`] class (how long
//! the offline copy survives).
//!
//! # Example
//!
//! ```rust
//! use offline_sync::{Priority, Retention, SetOptions};
//! use std::time::Duration;
//!
//! // Default: client TTL, Medium priority, transient retention
//! let opts = SetOptions::default();
//! assert_eq!(opts.priority, Priority::Medium);
//!
//! // User settings: keep offline for a month, refresh early
//! let opts = SetOptions::preference().with_priority(Priority::High);
//! assert_eq!(opts.retention, Retention::Preference);
//!
//! // Short-lived lookup
//! let opts = SetOptions::default().with_ttl(Duration::from_secs(5 * 60));
//! assert_eq!(opts.ttl, Some(Duration::from_secs(300)));
//! ```

use std::time::Duration;

use crate::offline::Retention;
use crate::record::Priority;

/// Options for [`SyncClient::set`](crate::SyncClient::set) and
/// [`SyncClient::mark_dirty_with`](crate::SyncClient::mark_dirty_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Cache TTL. `None` uses the configured `default_ttl_secs`.
    pub ttl: Option<Duration>,

    /// Refresh tier during sync.
    ///
    /// Default: `Medium`
    pub priority: Priority,

    /// Offline retention class. Ignored for keys that already have a stored
    /// record with a pending change.
    ///
    /// Default: `Transient`
    pub retention: Retention,
}

impl SetOptions {
    /// Options for user-preference-like records (30 day retention by default).
    #[must_use]
    pub fn preference() -> Self {
        Self {
            retention: Retention::Preference,
            ..Self::default()
        }
    }

    /// Options for history-like records (7 day retention by default).
    #[must_use]
    pub fn history() -> Self {
        Self {
            retention: Retention::History,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// The TTL to apply, falling back to `default_ttl`.
    #[must_use]
    pub fn ttl_or(&self, default_ttl: Duration) -> Duration {
        self.ttl.unwrap_or(default_ttl)
    }
}
