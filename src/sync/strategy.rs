//! When does a sync cycle run, and how much of it.
//!
//! | Trigger \ Strategy      | Immediate      | Scheduled        | Manual | Smart                   |
//! |-------------------------|----------------|------------------|--------|-------------------------|
//! | connectivity regained   | full if pending| -                | -      | pending-only if High    |
//! | timer                   | -              | full (Wi-Fi opt.)| -      | full                    |
//! | explicit request        | full           | full (Wi-Fi opt.)| full   | full                    |
//! | explicit, forced        | full           | full             | full   | full                    |
//!
//! Nothing runs while offline. Low-priority refresh additionally needs Wi-Fi
//! when `wifi_only_low_priority` is set, unless the request is forced.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::connectivity::Connectivity;
use crate::offline::PendingCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Sync as soon as connectivity returns
    Immediate,
    /// Fixed interval, optionally Wi-Fi only
    Scheduled,
    /// Only on explicit request
    Manual,
    /// Immediate for high-priority changes, scheduled for bulk refresh
    #[default]
    Smart,
}

/// Runtime-adjustable sync policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub strategy: SyncStrategy,
    pub interval: Duration,
    pub scheduled_wifi_only: bool,
    pub wifi_only_low_priority: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::Smart,
            interval: Duration::from_secs(2 * 3600),
            scheduled_wifi_only: false,
            wifi_only_low_priority: true,
        }
    }
}

/// What asked for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRegained,
    Timer,
    /// `perform_sync` or a queued request
    Manual { force: bool },
}

/// Which phases a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleScope {
    /// Drain, refresh, cleanup
    Full,
    /// Drain and cleanup only
    PendingOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub scope: CycleScope,
    /// Low-priority refresh allowed on the current connection
    pub refresh_low: bool,
}

impl SyncPolicy {
    /// Decide whether `trigger` starts a cycle. `None` means skip.
    #[must_use]
    pub fn plan(&self, trigger: SyncTrigger, connectivity: Connectivity, pending: PendingCounts) -> Option<CyclePlan> {
        if !connectivity.is_online() {
            return None;
        }
        let wifi = connectivity.is_wifi();
        let scheduled_blocked = self.scheduled_wifi_only && !wifi;

        let scope = match (trigger, self.strategy) {
            (SyncTrigger::Manual { force: true }, _) => {
                return Some(CyclePlan {
                    scope: CycleScope::Full,
                    refresh_low: true,
                })
            }
            (SyncTrigger::Manual { force: false }, SyncStrategy::Scheduled) if scheduled_blocked => return None,
            (SyncTrigger::Manual { force: false }, _) => CycleScope::Full,

            (SyncTrigger::ConnectivityRegained, SyncStrategy::Immediate) if pending.total() > 0 => CycleScope::Full,
            (SyncTrigger::ConnectivityRegained, SyncStrategy::Smart) if pending.high > 0 => CycleScope::PendingOnly,
            (SyncTrigger::ConnectivityRegained, _) => return None,

            (SyncTrigger::Timer, SyncStrategy::Scheduled) if scheduled_blocked => return None,
            (SyncTrigger::Timer, SyncStrategy::Scheduled | SyncStrategy::Smart) => CycleScope::Full,
            (SyncTrigger::Timer, _) => return None,
        };

        Some(CyclePlan {
            scope,
            refresh_low: wifi || !self.wifi_only_low_priority,
        })
    }
}
