// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for offline-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `tier`: memory, persistent
//! - `operation`: get, set, mark_dirty, fetch, write, subscribe
//! - `outcome`: success, retry, terminal, exhausted, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a public client operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "offline_sync_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record client operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "offline_sync_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a cache lookup on one tier
pub fn record_cache_lookup(tier: &str, hit: bool) {
    counter!(
        "offline_sync_cache_lookups_total",
        "tier" => tier.to_string(),
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

/// Record capacity evictions
pub fn record_evictions(tier: &str, count: usize, bytes: usize) {
    counter!("offline_sync_evictions_total", "tier" => tier.to_string()).increment(count as u64);
    if bytes > 0 {
        counter!("offline_sync_evicted_bytes_total", "tier" => tier.to_string()).increment(bytes as u64);
    }
}

/// Set persistent cache tier size
pub fn set_persistent_usage(bytes: usize, items: usize) {
    gauge!("offline_sync_persistent_cache_bytes").set(bytes as f64);
    gauge!("offline_sync_persistent_cache_items").set(items as f64);
}

/// Record a local storage failure that was logged and absorbed
pub fn record_storage_error(component: &str, operation: &str) {
    counter!(
        "offline_sync_storage_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a retry (an attempt that failed and will be tried again)
pub fn record_retry_attempt(operation: &str) {
    counter!(
        "offline_sync_retry_attempts_total",
        "operation" => operation_label(operation)
    )
    .increment(1);
}

/// Record the final outcome of a protected remote call
pub fn record_retry_outcome(operation: &str, outcome: &str) {
    counter!(
        "offline_sync_remote_calls_total",
        "operation" => operation_label(operation),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Operation names carry the key ("write job_1"); only the verb is a label.
fn operation_label(operation: &str) -> String {
    operation.split_whitespace().next().unwrap_or(operation).to_string()
}

/// Record circuit breaker state change (0 = closed, 1 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "offline_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "offline_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the number of unconfirmed pending changes
pub fn set_pending_depth(count: usize) {
    gauge!("offline_sync_pending_changes").set(count as f64);
}

/// Record one pending change leaving (or failing to leave) the ledger
pub fn record_drain(outcome: &str) {
    counter!(
        "offline_sync_drained_changes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a refresh of one key or collection
pub fn record_refresh(priority: &str, success: bool) {
    counter!(
        "offline_sync_refreshes_total",
        "priority" => priority.to_string(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);
}

/// Record a finished (or aborted) sync cycle
pub fn record_sync_cycle(outcome: &str, duration: Duration) {
    counter!(
        "offline_sync_cycles_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("offline_sync_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a `get` served from the offline copy after a remote failure
pub fn record_offline_fallback() {
    counter!("offline_sync_offline_fallbacks_total").increment(1);
}

/// Set connectivity (0 = offline, 1 = cellular, 2 = wifi)
pub fn set_connectivity(level: u8) {
    gauge!("offline_sync_connectivity").set(level as f64);
}

/// Set client lifecycle state
pub fn set_client_state(state: &str) {
    gauge!(
        "offline_sync_client_state",
        "state" => state.to_string()
    )
    .set(1.0);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($op:expr) => {
        $crate::metrics::LatencyTimer::new($op)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_cache_metrics() {
        record_cache_lookup("memory", true);
        record_cache_lookup("persistent", false);
        record_evictions("memory", 1, 0);
        record_evictions("persistent", 3, 4096);
        set_persistent_usage(1024 * 1024, 12);
    }

    #[test]
    fn test_remote_metrics() {
        record_retry_attempt("fetch_one job_1");
        record_retry_outcome("write job_1", "exhausted");
        set_circuit_state("remote", 1);
        record_circuit_call("remote", "rejected");
    }

    #[test]
    fn test_operation_label_drops_key() {
        assert_eq!(operation_label("write job_1"), "write");
        assert_eq!(operation_label("query"), "query");
        assert_eq!(operation_label(""), "");
    }

    #[test]
    fn test_sync_metrics() {
        set_pending_depth(4);
        record_drain("confirmed");
        record_refresh("high", true);
        record_sync_cycle("completed", Duration::from_millis(120));
        record_offline_fallback();
        set_connectivity(2);
        set_client_state("Running");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("get");
            std::thread::sleep(Duration::from_micros(10));
        }
        let _t = time_operation!("set");
    }
}
