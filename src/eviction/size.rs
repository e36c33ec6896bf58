// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Victim selection for the persistent cache tier.
//!
//! Both policies work on lightweight metadata so the cache can decide what
//! to delete without loading payloads. Dirty entries are never selected:
//! their value is the only copy of an unconfirmed local mutation.

use std::time::Duration;

use crate::clock::duration_millis;

/// Metadata for one persisted cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: String,
    pub size_bytes: usize,
    pub cached_at: i64,
    pub expires_at: i64,
    pub is_dirty: bool,
}

/// Pick entries to delete once the tier exceeds `max_bytes`.
///
/// Oldest `cached_at` first until the freed size reaches the overflow plus
/// `buffer_bytes`, so the next write does not immediately trigger another
/// eviction. Returns an empty list when the tier is within budget.
#[must_use]
pub fn select_size_victims(
    entries: &[EvictionCandidate],
    total_bytes: usize,
    max_bytes: usize,
    buffer_bytes: usize,
) -> Vec<String> {
    if total_bytes <= max_bytes {
        return Vec::new();
    }
    let target = (total_bytes - max_bytes).saturating_add(buffer_bytes);

    let mut clean: Vec<&EvictionCandidate> = entries.iter().filter(|e| !e.is_dirty).collect();
    clean.sort_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.key.cmp(&b.key)));

    let mut freed = 0usize;
    let mut victims = Vec::new();
    for entry in clean {
        if freed >= target {
            break;
        }
        freed = freed.saturating_add(entry.size_bytes);
        victims.push(entry.key.clone());
    }
    victims
}

/// Pick entries a periodic sweep should delete: expired ones, and any entry
/// older than `max_age` regardless of its TTL.
#[must_use]
pub fn select_sweep_victims(entries: &[EvictionCandidate], now: i64, max_age: Duration) -> Vec<String> {
    let max_age = duration_millis(max_age);
    entries
        .iter()
        .filter(|e| !e.is_dirty)
        .filter(|e| now > e.expires_at || now.saturating_sub(e.cached_at) > max_age)
        .map(|e| e.key.clone())
        .collect()
}
