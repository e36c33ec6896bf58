//! Public types for the bounded cache.

use std::time::Duration;

use crate::record::CacheEntry;

/// Limits for both cache tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries kept in the in-memory LRU tier
    pub max_memory_items: usize,
    /// Byte ceiling for the persistent tier
    pub max_bytes: usize,
    /// Extra bytes freed beyond the overflow when the ceiling is hit
    pub eviction_buffer_bytes: usize,
    /// Persistent entries older than this are swept regardless of TTL
    pub max_age: Duration,
    /// TTL applied when a caller does not give one
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_items: 50,
            max_bytes: 50 * 1024 * 1024,
            eviction_buffer_bytes: 1024 * 1024,
            max_age: Duration::from_secs(7 * 24 * 3600),
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Memory(CacheEntry),
    /// Loaded from disk and promoted into memory
    Persistent(CacheEntry),
    Miss,
}

impl CacheLookup {
    #[must_use]
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Memory(e) | Self::Persistent(e) => Some(e),
            Self::Miss => None,
        }
    }

    #[must_use]
    pub fn is_hit(&self) -> bool {
        !matches!(self, Self::Miss)
    }
}

/// Counters and sizes of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped from either tier by capacity limits
    pub evictions: u64,
    pub memory_items: usize,
    pub persistent_items: usize,
    pub persistent_bytes: usize,
}
