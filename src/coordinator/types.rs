//! Public types for the sync client.

use std::fmt;

/// Client lifecycle state.
///
/// Use [`super::SyncClient::state()`] to check the current state or
/// [`super::SyncClient::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Built, background loop not started. Foreground operations work.
    Created,
    /// Background sync loop running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Shut down; every operation returns `SyncError::Closed`
    Stopped,
}

impl ClientState {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Where a fetched value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Memory,
    Persistent,
    Remote,
    /// The remote failed and the last known offline copy was returned
    Offline,
}

impl Source {
    /// The value may be stale because the remote could not be reached.
    #[must_use]
    pub fn is_degraded(self) -> bool {
        self == Self::Offline
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Persistent => write!(f, "persistent"),
            Self::Remote => write!(f, "remote"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A value plus its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
    /// Epoch millis the value was cached or stored locally
    pub cached_at: i64,
}

impl<T> Fetched<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            source: self.source,
            cached_at: self.cached_at,
        }
    }
}

/// Snapshot returned by [`super::SyncClient::stats()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries in the memory tier
    pub memory_cache_size: usize,
    pub persistent_items: usize,
    pub persistent_bytes: usize,
    pub pending_count: usize,
    pub circuit_open: bool,
    /// Epoch millis of the last completed sync cycle
    pub last_sync_time: Option<i64>,
}
