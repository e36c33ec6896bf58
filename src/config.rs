//! Configuration for the offline-sync client.
//!
//! # Example
//!
//! ```
//! use offline_sync::{SyncConfig, SyncStrategy};
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.memory_max_items, 50);
//! assert_eq!(config.persistent_max_bytes, 50 * 1024 * 1024); // 50 MiB
//!
//! // Tuned for a metered connection
//! let config = SyncConfig {
//!     sync_strategy: SyncStrategy::Scheduled,
//!     scheduled_wifi_only: true,
//!     sync_interval_secs: 4 * 3600,
//!     ..Default::default()
//! };
//! assert_eq!(config.sync_interval().as_secs(), 14_400);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::offline::RetentionPolicy;
use crate::resilience::{CircuitConfig, RetryConfig};
use crate::sync::{SyncPolicy, SyncStrategy};

/// Configuration for the offline-sync client.
///
/// All fields have sensible defaults. Sync policy fields (`sync_strategy`,
/// `sync_interval_secs`, `scheduled_wifi_only`, `wifi_only_low_priority`)
/// can be changed at runtime through the config watch channel; the rest are
/// read once at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_retry_max_retries")]
    pub retry_max_retries: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Symmetric jitter fraction (default: 0.10)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,

    /// Consecutive failed calls that open the breaker
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,

    /// Memory tier capacity in entries (default: 50)
    #[serde(default = "default_memory_max_items")]
    pub memory_max_items: usize,
    /// Persistent tier ceiling in bytes (default: 50 MiB)
    #[serde(default = "default_persistent_max_bytes")]
    pub persistent_max_bytes: usize,
    /// Extra bytes freed on overflow (default: 1 MiB)
    #[serde(default = "default_eviction_buffer_bytes")]
    pub eviction_buffer_bytes: usize,
    /// Cache sweep period (default: 30 minutes)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Persisted entries older than this are swept regardless of TTL (default: 7 days)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// TTL when `set` is called without one (default: 1 hour)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub sync_strategy: SyncStrategy,
    /// Timer period for Scheduled/Smart (default: 2 hours)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Scheduled cycles only run on Wi-Fi
    #[serde(default)]
    pub scheduled_wifi_only: bool,
    /// Low-priority refresh only runs on Wi-Fi
    #[serde(default = "default_true")]
    pub wifi_only_low_priority: bool,

    #[serde(default = "default_retention_transient_secs")]
    pub retention_transient_secs: u64,
    #[serde(default = "default_retention_preference_secs")]
    pub retention_preference_secs: u64,
    #[serde(default = "default_retention_history_secs")]
    pub retention_history_secs: u64,
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

fn default_retry_max_retries() -> u32 { 3 }
fn default_retry_initial_delay_ms() -> u64 { 1000 }
fn default_retry_max_delay_ms() -> u64 { 10_000 }
fn default_retry_jitter() -> f64 { 0.10 }
fn default_circuit_failure_threshold() -> u32 { 5 }
fn default_circuit_cooldown_secs() -> u64 { 300 }
fn default_memory_max_items() -> usize { 50 }
fn default_persistent_max_bytes() -> usize { 50 * 1024 * 1024 } // 50 MiB
fn default_eviction_buffer_bytes() -> usize { 1024 * 1024 } // 1 MiB
fn default_sweep_interval_secs() -> u64 { 30 * 60 }
fn default_max_age_secs() -> u64 { 7 * DAY }
fn default_ttl_secs() -> u64 { HOUR }
fn default_sync_interval_secs() -> u64 { 2 * HOUR }
fn default_true() -> bool { true }
fn default_retention_transient_secs() -> u64 { DAY }
fn default_retention_preference_secs() -> u64 { 30 * DAY }
fn default_retention_history_secs() -> u64 { 7 * DAY }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_max_retries: default_retry_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: default_retry_jitter(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
            memory_max_items: default_memory_max_items(),
            persistent_max_bytes: default_persistent_max_bytes(),
            eviction_buffer_bytes: default_eviction_buffer_bytes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_age_secs: default_max_age_secs(),
            default_ttl_secs: default_ttl_secs(),
            sync_strategy: SyncStrategy::default(),
            sync_interval_secs: default_sync_interval_secs(),
            scheduled_wifi_only: false,
            wifi_only_low_priority: default_true(),
            retention_transient_secs: default_retention_transient_secs(),
            retention_preference_secs: default_retention_preference_secs(),
            retention_history_secs: default_retention_history_secs(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_retries: self.retry_max_retries,
            jitter: self.retry_jitter,
        }
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: Duration::from_secs(self.circuit_cooldown_secs),
        }
    }

    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_memory_items: self.memory_max_items,
            max_bytes: self.persistent_max_bytes,
            eviction_buffer_bytes: self.eviction_buffer_bytes,
            max_age: Duration::from_secs(self.max_age_secs),
            default_ttl: self.default_ttl(),
        }
    }

    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            transient: Duration::from_secs(self.retention_transient_secs),
            preference: Duration::from_secs(self.retention_preference_secs),
            history: Duration::from_secs(self.retention_history_secs),
        }
    }

    #[must_use]
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            strategy: self.sync_strategy,
            interval: self.sync_interval(),
            scheduled_wifi_only: self.scheduled_wifi_only,
            wifi_only_low_priority: self.wifi_only_low_priority,
        }
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}
