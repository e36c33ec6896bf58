//! Sync cycle phases and the per-cycle report.

use std::fmt;

use super::strategy::{CycleScope, SyncTrigger};

/// Where the orchestrator currently is.
///
/// Cycles move strictly forward through this list and end back in `Idle`;
/// phases a cycle does not need are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Draining,
    RefreshingHigh,
    RefreshingLow,
    Cleanup,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Draining => write!(f, "draining"),
            Self::RefreshingHigh => write!(f, "refreshing_high"),
            Self::RefreshingLow => write!(f, "refreshing_low"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Why a started cycle stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Breaker open at the start of the cycle or tripped mid-cycle
    CircuitOpen,
    /// Local storage failed; the message is the storage error
    Storage(String),
    /// The client is shutting down
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Aborted { phase: SyncPhase, reason: AbortReason },
}

/// A pending change whose remote write failed this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedChange {
    pub key: String,
    pub error: String,
    /// The failure was terminal; the change will not succeed without intervention
    pub terminal: bool,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub scope: CycleScope,
    pub started_at: i64,
    pub finished_at: i64,
    /// Pending changes confirmed and removed from the ledger
    pub drained: usize,
    /// Confirmed writes whose ledger entry changed while in flight
    pub superseded: usize,
    pub failed: Vec<FailedChange>,
    pub refreshed_high: usize,
    /// Medium and Low tiers
    pub refreshed_low: usize,
    /// Low tier skipped by the connection policy
    pub low_skipped: bool,
    pub refresh_failures: usize,
    pub purged: usize,
    pub swept: usize,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    pub(crate) fn started(trigger: SyncTrigger, scope: CycleScope, now: i64) -> Self {
        Self {
            trigger,
            scope,
            started_at: now,
            finished_at: now,
            drained: 0,
            superseded: 0,
            failed: Vec::new(),
            refreshed_high: 0,
            refreshed_low: 0,
            low_skipped: false,
            refresh_failures: 0,
            purged: 0,
            swept: 0,
            outcome: SyncOutcome::Completed,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }
}
