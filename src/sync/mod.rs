//! Offline sync: connectivity, strategy, and the orchestrator that drains
//! pending changes and refreshes local data.
//!
//! ```text
//! ConnectivityMonitor ──watch──┐
//! sync timer ──────────────────┤
//! request_sync / perform_sync ─┼──► SyncOrchestrator::run_cycle
//! config watch ── SyncPolicy ──┘        │
//!                                       ├─ RetryExecutor ─► RemoteStore
//!                                       └─ LocalState (BoundedCache + OfflineStore)
//! ```

mod connectivity;
mod local;
mod orchestrator;
mod report;
mod strategy;

pub use connectivity::{ConnectionType, Connectivity, ConnectivityMonitor};
pub use local::LocalState;
pub use orchestrator::{SyncOrchestrator, TrackedQuery};
pub use report::{AbortReason, FailedChange, SyncOutcome, SyncPhase, SyncReport};
pub use strategy::{CyclePlan, CycleScope, SyncPolicy, SyncStrategy, SyncTrigger};
