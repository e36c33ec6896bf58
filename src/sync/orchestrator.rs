// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync cycles and the background loop that triggers them.
//!
//! ```text
//! run_cycle(trigger)
//!   ├─ plan: connectivity + strategy + pending counts   (skip → None)
//!   ├─ single-flight guard                              (busy → None)
//!   ├─ breaker gate                                     (open → aborted)
//!   ├─ Draining:        pending changes, High → Low, oldest first
//!   ├─ RefreshingHigh:  tracked High queries + stored High keys
//!   ├─ RefreshingLow:   Medium, then Low when the connection allows
//!   └─ Cleanup:         purge expired offline records, sweep cache
//! ```
//!
//! A cycle stops at the first circuit-open result: the remote is degraded
//! and every further call would be refused anyway. Changes confirmed before
//! that point stay confirmed.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{watch, Notify};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use super::connectivity::Connectivity;
use super::local::LocalState;
use super::report::{AbortReason, FailedChange, SyncOutcome, SyncPhase, SyncReport};
use super::strategy::{CyclePlan, CycleScope, SyncPolicy, SyncTrigger};
use crate::config::SyncConfig;
use crate::record::{PendingChange, Priority};
use crate::remote::{Query, RemoteError, RemoteStore};
use crate::resilience::{RetryError, RetryExecutor};

const NEVER: i64 = i64::MIN;

/// A collection query refreshed on every full cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedQuery {
    pub query: Query,
    pub priority: Priority,
}

/// Drives drain/refresh/cleanup cycles against the remote store.
pub struct SyncOrchestrator {
    remote: Arc<dyn RemoteStore>,
    executor: RetryExecutor,
    local: LocalState,
    connectivity: watch::Receiver<Connectivity>,
    policy: RwLock<SyncPolicy>,
    sweep_interval: RwLock<Duration>,
    tracked: RwLock<Vec<TrackedQuery>>,

    running: AtomicBool,
    phase: watch::Sender<SyncPhase>,
    last_sync_time: AtomicI64,
    last_report: RwLock<Option<SyncReport>>,

    requested: Notify,
    closed: watch::Sender<bool>,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        executor: RetryExecutor,
        local: LocalState,
        connectivity: watch::Receiver<Connectivity>,
        config: &SyncConfig,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        let (closed, _) = watch::channel(false);
        Self {
            remote,
            executor,
            local,
            connectivity,
            policy: RwLock::new(config.sync_policy()),
            sweep_interval: RwLock::new(config.sweep_interval()),
            tracked: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            phase,
            last_sync_time: AtomicI64::new(NEVER),
            last_report: RwLock::new(None),
            requested: Notify::new(),
            closed,
        }
    }

    #[must_use]
    pub fn policy(&self) -> SyncPolicy {
        self.policy.read().clone()
    }

    pub fn set_policy(&self, policy: SyncPolicy) {
        info!(strategy = ?policy.strategy, interval_secs = policy.interval.as_secs(), "Sync policy updated");
        *self.policy.write() = policy;
    }

    /// Watch the current phase. `Idle` between cycles.
    #[must_use]
    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Whether a cycle is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Epoch millis of the last completed cycle.
    #[must_use]
    pub fn last_sync_time(&self) -> Option<i64> {
        match self.last_sync_time.load(Ordering::Acquire) {
            NEVER => None,
            t => Some(t),
        }
    }

    #[must_use]
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    /// Refresh `query` on every full cycle at `priority`.
    ///
    /// Re-tracking the same query updates its priority.
    pub fn track(&self, query: Query, priority: Priority) {
        let mut tracked = self.tracked.write();
        match tracked.iter_mut().find(|t| t.query == query) {
            Some(existing) => existing.priority = priority,
            None => tracked.push(TrackedQuery { query, priority }),
        }
    }

    /// Stop refreshing `query`. Returns whether it was tracked.
    pub fn untrack(&self, query: &Query) -> bool {
        let mut tracked = self.tracked.write();
        let before = tracked.len();
        tracked.retain(|t| &t.query != query);
        tracked.len() != before
    }

    #[must_use]
    pub fn tracked(&self) -> Vec<TrackedQuery> {
        self.tracked.read().clone()
    }

    /// Ask the background loop for a non-forced cycle.
    ///
    /// Requests made while a cycle is running collapse into one follow-up.
    pub fn request_sync(&self) {
        self.requested.notify_one();
    }

    /// Run one cycle now. Returns `true` only if it started and completed.
    ///
    /// `force` bypasses the strategy and Wi-Fi restrictions. It never
    /// bypasses an offline connection or an open breaker.
    pub async fn perform_sync(&self, force: bool) -> bool {
        self.run_cycle(SyncTrigger::Manual { force })
            .await
            .is_some_and(|report| report.is_completed())
    }

    /// Run one cycle for `trigger`. `None` means it did not start.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> Option<SyncReport> {
        if *self.closed.borrow() {
            debug!("Orchestrator closed, ignoring sync trigger");
            return None;
        }

        let connectivity = *self.connectivity.borrow();
        let pending = self.local.offline.pending_counts();
        let plan = self.policy.read().plan(trigger, connectivity, pending);
        let Some(plan) = plan else {
            debug!(connection = ?connectivity.connection_type, pending = pending.total(), "Sync skipped by policy");
            return None;
        };

        let Some(_guard) = RunningGuard::acquire(self) else {
            debug!("Sync already in progress");
            return None;
        };

        let start = Instant::now();
        let mut report = SyncReport::started(trigger, plan.scope, self.local.clock.now_millis());

        let result = if self.executor.breaker().allow_call() {
            info!(scope = ?plan.scope, refresh_low = plan.refresh_low, pending = pending.total(), "Sync cycle started");
            self.execute_phases(plan, &mut report).await
        } else {
            warn!("Remote circuit open, sync cycle not started");
            Err(AbortReason::CircuitOpen)
        };

        let now = self.local.clock.now_millis();
        report.finished_at = now;
        match result {
            Ok(()) => {
                self.last_sync_time.store(now, Ordering::Release);
                info!(
                    drained = report.drained,
                    failed = report.failed.len(),
                    refreshed_high = report.refreshed_high,
                    refreshed_low = report.refreshed_low,
                    refresh_failures = report.refresh_failures,
                    purged = report.purged,
                    swept = report.swept,
                    "Sync cycle completed"
                );
                crate::metrics::record_sync_cycle("completed", start.elapsed());
            }
            Err(reason) => {
                let phase = *self.phase.borrow();
                warn!(%phase, ?reason, drained = report.drained, "Sync cycle aborted");
                crate::metrics::record_sync_cycle("aborted", start.elapsed());
                report.outcome = SyncOutcome::Aborted { phase, reason };
            }
        }

        *self.last_report.write() = Some(report.clone());
        Some(report)
    }

    async fn execute_phases(&self, plan: CyclePlan, report: &mut SyncReport) -> Result<(), AbortReason> {
        self.enter(SyncPhase::Draining)?;
        self.drain(report).await?;
        self.check_breaker()?;

        if plan.scope == CycleScope::Full {
            self.enter(SyncPhase::RefreshingHigh)?;
            report.refreshed_high = self.refresh_tier(Priority::High, report).await?;
            self.check_breaker()?;

            self.enter(SyncPhase::RefreshingLow)?;
            report.refreshed_low = self.refresh_tier(Priority::Medium, report).await?;
            if plan.refresh_low {
                report.refreshed_low += self.refresh_tier(Priority::Low, report).await?;
            } else {
                debug!("Low-priority refresh skipped on this connection");
                report.low_skipped = true;
            }
            self.check_breaker()?;
        }

        self.enter(SyncPhase::Cleanup)?;
        report.purged = self.local.offline.purge_expired().await.map_err(storage_abort)?;
        report.swept = self.local.cache.sweep().await;
        Ok(())
    }

    fn enter(&self, phase: SyncPhase) -> Result<(), AbortReason> {
        if *self.closed.borrow() {
            return Err(AbortReason::Shutdown);
        }
        debug!(%phase, "Entering sync phase");
        self.phase.send_replace(phase);
        Ok(())
    }

    fn check_breaker(&self) -> Result<(), AbortReason> {
        if self.executor.breaker().is_open() {
            return Err(AbortReason::CircuitOpen);
        }
        Ok(())
    }

    /// Push pending changes in drain order.
    async fn drain(&self, report: &mut SyncReport) -> Result<(), AbortReason> {
        for change in self.local.offline.pending_sorted() {
            if *self.closed.borrow() {
                return Err(AbortReason::Shutdown);
            }
            self.push_change(&change, report).await?;
        }
        Ok(())
    }

    async fn push_change(&self, change: &PendingChange, report: &mut SyncReport) -> Result<(), AbortReason> {
        let key = change.key.as_str();
        let operation = format!("write {}", key);
        let result = self
            .executor
            .execute_classified(&operation, || self.remote.write(key, &change.delta, change.mode))
            .await;

        match result {
            Ok(_) => {
                let removed = self.local.confirm(change).await.map_err(storage_abort)?;
                if removed {
                    report.drained += 1;
                    crate::metrics::record_drain("confirmed");
                } else {
                    report.superseded += 1;
                    crate::metrics::record_drain("superseded");
                }
                Ok(())
            }
            Err(e) if e.is_circuit_open() => Err(AbortReason::CircuitOpen),
            Err(e) => {
                let terminal = e.is_terminal();
                warn!(key, terminal, error = %e, "Pending change not confirmed");
                self.local
                    .offline
                    .record_failure(key, &e.to_string())
                    .await
                    .map_err(storage_abort)?;
                crate::metrics::record_drain(if terminal { "terminal" } else { "failed" });
                report.failed.push(FailedChange {
                    key: key.to_string(),
                    error: e.to_string(),
                    terminal,
                });
                Ok(())
            }
        }
    }

    /// Refresh everything stored or tracked at `priority`. Returns the
    /// number of records written locally.
    async fn refresh_tier(&self, priority: Priority, report: &mut SyncReport) -> Result<usize, AbortReason> {
        let mut seen: HashSet<String> = HashSet::new();

        let queries: Vec<Query> = self
            .tracked
            .read()
            .iter()
            .filter(|t| t.priority == priority)
            .map(|t| t.query.clone())
            .collect();

        for query in queries {
            let operation = format!("fetch {}", query.collection_path);
            match self
                .executor
                .execute_classified(&operation, || self.remote.fetch(&query))
                .await
            {
                Ok(records) => {
                    for record in records {
                        self.store(&record.path, record.data, priority).await?;
                        seen.insert(record.path);
                    }
                }
                Err(e) => self.refresh_failed(&operation, e, priority, report)?,
            }
        }

        for key in self.local.offline.keys_by_priority(priority) {
            if seen.contains(&key) {
                continue;
            }
            let operation = format!("fetch_one {}", key);
            match self
                .executor
                .execute_classified(&operation, || self.remote.fetch_one(&key))
                .await
            {
                Ok(Some(record)) => {
                    self.store(&key, record.data, priority).await?;
                    seen.insert(key);
                }
                Ok(None) => debug!(key = %key, "Record absent remotely, keeping local copy"),
                Err(e) => self.refresh_failed(&operation, e, priority, report)?,
            }
        }

        Ok(seen.len())
    }

    async fn store(&self, key: &str, data: serde_json::Value, priority: Priority) -> Result<(), AbortReason> {
        self.local
            .store_remote(key, data, Some(priority), None)
            .await
            .map_err(storage_abort)?;
        crate::metrics::record_refresh(priority.as_str(), true);
        Ok(())
    }

    fn refresh_failed(
        &self,
        operation: &str,
        error: RetryError<RemoteError>,
        priority: Priority,
        report: &mut SyncReport,
    ) -> Result<(), AbortReason> {
        if error.is_circuit_open() {
            return Err(AbortReason::CircuitOpen);
        }
        warn!(operation, %priority, error = %error, "Refresh failed");
        crate::metrics::record_refresh(priority.as_str(), false);
        report.refresh_failures += 1;
        Ok(())
    }

    /// Stop the background loop and refuse new cycles. A cycle in progress
    /// stops at its next phase or pending change.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Background loop: connectivity changes, the sync timer, the cache
    /// sweep timer, queued requests and config updates. Returns after
    /// [`close`](Self::close).
    ///
    /// Connectivity is snapshotted when `run` is called, not when the
    /// returned future is first polled, so a reconnect that lands between
    /// spawning the loop and its first poll still triggers a cycle.
    pub fn run(
        self: Arc<Self>,
        config_rx: Option<watch::Receiver<SyncConfig>>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut connectivity = self.connectivity.clone();
        let was_online = connectivity.borrow_and_update().is_online();
        self.event_loop(connectivity, was_online, config_rx)
            .instrument(tracing::info_span!("sync_loop"))
    }

    async fn event_loop(
        self: Arc<Self>,
        connectivity: watch::Receiver<Connectivity>,
        mut was_online: bool,
        mut config_rx: Option<watch::Receiver<SyncConfig>>,
    ) {
        let mut closed = self.closed.subscribe();
        let mut connectivity = Some(connectivity);

        let mut sync_timer = periodic(self.policy().interval);
        let mut sweep_timer = periodic(*self.sweep_interval.read());

        info!("Sync loop running");
        loop {
            if *closed.borrow_and_update() {
                break;
            }

            tokio::select! {
                res = closed.changed() => {
                    if res.is_err() {
                        break;
                    }
                }

                current = next_change(&mut connectivity) => {
                    let online = current.is_online();
                    if online && !was_online {
                        info!(connection = ?current.connection_type, "Connectivity regained");
                        self.run_cycle(SyncTrigger::ConnectivityRegained).await;
                    }
                    was_online = online;
                }

                _ = sync_timer.tick() => {
                    self.run_cycle(SyncTrigger::Timer).await;
                }

                _ = sweep_timer.tick() => {
                    let swept = self.local.cache.sweep().await;
                    if swept > 0 {
                        debug!(swept, "Periodic cache sweep");
                    }
                }

                _ = self.requested.notified() => {
                    self.run_cycle(SyncTrigger::Manual { force: false }).await;
                }

                config = next_change(&mut config_rx) => {
                    let policy = config.sync_policy();
                    if policy.interval != self.policy().interval {
                        sync_timer = periodic(policy.interval);
                    }
                    self.set_policy(policy);

                    let sweep = config.sweep_interval();
                    if sweep != *self.sweep_interval.read() {
                        *self.sweep_interval.write() = sweep;
                        sweep_timer = periodic(sweep);
                    }
                }
            }
        }
        info!("Sync loop stopped");
    }
}

fn storage_abort(e: crate::storage::StorageError) -> AbortReason {
    AbortReason::Storage(e.to_string())
}

/// An interval whose first tick is one full period away.
fn periodic(period: Duration) -> Interval {
    let mut timer = interval_at(tokio::time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Next value of an optional watch channel. A missing or closed channel
/// never resolves.
async fn next_change<T: Clone>(rx: &mut Option<watch::Receiver<T>>) -> T {
    if let Some(inner) = rx.as_mut() {
        if inner.changed().await.is_ok() {
            return inner.borrow_and_update().clone();
        }
        *rx = None;
    }
    std::future::pending().await
}

/// Single-flight guard. Clears the running flag and resets the phase on drop.
struct RunningGuard<'a> {
    owner: &'a SyncOrchestrator,
}

impl<'a> RunningGuard<'a> {
    fn acquire(owner: &'a SyncOrchestrator) -> Option<Self> {
        owner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { owner })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.owner.phase.send_replace(SyncPhase::Idle);
        self.owner.running.store(false, Ordering::Release);
    }
}
