//! Chaos Testing for Offline Sync
//!
//! This module tests failure scenarios using:
//! 1. **FailingKv wrapper** - local storage errors injected per operation kind
//!    or from a given call count
//! 2. **Scripted remote faults** - outages and flaky calls via [`InMemoryRemote`]
//! 3. **Data corruption** - garbage rows in the local store before open
//! 4. **StallingKv wrapper** - holds one read open so concurrent writers
//!    can be lined up against it
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use offline_sync::remote::memory::RemoteOp;
use offline_sync::sync::{AbortReason, SyncOutcome};
use offline_sync::{
    BoundedCache, CacheConfig, CacheEntry, Clock, ConnectionType, ConnectivityMonitor, InMemoryKv, InMemoryRemote,
    KvStore, ManualClock, Priority, RemoteErrorKind, SetOptions, StorageError, SyncClient, SyncConfig, SyncError,
    SyncPhase,
};

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// A wrapper that injects failures into selected operation kinds.
///
/// Reads cover `get_string` and key listing; writes cover `set_string`;
/// removes cover `remove` (and therefore `remove_many`).
pub struct FailingKv {
    inner: Arc<InMemoryKv>,
    call_count: AtomicU64,
    /// Writes numbered above this fail (1-indexed, u64::MAX disables)
    fail_writes_after: AtomicU64,
    write_count: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
    error_msg: String,
}

#[allow(dead_code)]
impl FailingKv {
    pub fn new(inner: Arc<InMemoryKv>, error_msg: &str) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_writes_after: AtomicU64::new(u64::MAX),
            write_count: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
            error_msg: error_msg.to_string(),
        }
    }

    /// Let `n` more writes through, then fail every write after them
    pub fn fail_writes_after(&self, n: u64) {
        let done = self.write_count.load(Ordering::SeqCst);
        self.fail_writes_after.store(done + n, Ordering::SeqCst);
    }

    pub fn break_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn break_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn break_removes(&self) {
        self.fail_removes.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_reads.store(false, Ordering::SeqCst);
        self.fail_writes.store(false, Ordering::SeqCst);
        self.fail_removes.store(false, Ordering::SeqCst);
        self.fail_writes_after.store(u64::MAX, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, flag: &AtomicBool) -> Result<(), StorageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Backend(self.error_msg.clone()))
        } else {
            Ok(())
        }
    }

    fn maybe_fail_write(&self) -> Result<(), StorageError> {
        self.maybe_fail(&self.fail_writes)?;
        let count = self.write_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.fail_writes_after.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(self.error_msg.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FailingKv {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.maybe_fail(&self.fail_reads)?;
        self.inner.get_string(key).await
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.maybe_fail_write()?;
        self.inner.set_string(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.maybe_fail(&self.fail_removes)?;
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.maybe_fail(&self.fail_reads)?;
        self.inner.keys().await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.maybe_fail(&self.fail_reads)?;
        self.inner.keys_with_prefix(prefix).await
    }
}

// =============================================================================
// Stalling Store Wrapper - Deterministic Interleaving
// =============================================================================

/// Parks the next read of one key until [`StallingKv::release`] is called.
pub struct StallingKv {
    inner: Arc<InMemoryKv>,
    stall_key: Mutex<Option<String>>,
    stalled: Notify,
    released: Notify,
}

impl StallingKv {
    pub fn new(inner: Arc<InMemoryKv>) -> Self {
        Self {
            inner,
            stall_key: Mutex::new(None),
            stalled: Notify::new(),
            released: Notify::new(),
        }
    }

    pub fn stall_next_read(&self, key: &str) {
        *self.stall_key.lock() = Some(key.to_string());
    }

    /// Resolves once a reader is parked
    pub async fn wait_stalled(&self) {
        self.stalled.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl KvStore for StallingKv {
    async fn get_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        let stall = {
            let mut target = self.stall_key.lock();
            if target.as_deref() == Some(key) {
                *target = None;
                true
            } else {
                false
            }
        };
        if stall {
            self.stalled.notify_one();
            self.released.notified().await;
        }
        self.inner.get_string(key).await
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set_string(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.inner.keys().await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> SyncConfig {
    SyncConfig {
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 10,
        ..Default::default()
    }
}

struct Harness {
    client: SyncClient,
    remote: Arc<InMemoryRemote>,
    store: Arc<FailingKv>,
    inner: Arc<InMemoryKv>,
}

async fn harness() -> Harness {
    let inner = Arc::new(InMemoryKv::new());
    harness_over(inner).await.expect("client builds")
}

async fn harness_over(inner: Arc<InMemoryKv>) -> Result<Harness, SyncError> {
    let store = Arc::new(FailingKv::new(inner.clone(), "injected disk failure"));
    let remote = Arc::new(InMemoryRemote::new());
    let client = SyncClient::builder(remote.clone(), store.clone())
        .clock(Arc::new(ManualClock::default()))
        .config(fast_config())
        .build()
        .await?;
    Ok(Harness {
        client,
        remote,
        store,
        inner,
    })
}

fn entry(clock: &ManualClock, key: &str, data: Value) -> CacheEntry {
    CacheEntry::new(key, data, clock.now_millis(), Duration::from_secs(3600), Priority::Medium)
}

// =============================================================================
// Local Storage Failures
// =============================================================================

#[tokio::test]
async fn chaos_cache_write_failure_keeps_memory_copy() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(FailingKv::new(Arc::new(InMemoryKv::new()), "disk full"));
    let cache = BoundedCache::open(store.clone(), clock.clone(), CacheConfig::default())
        .await
        .unwrap();

    store.break_writes();
    cache.set(entry(&clock, "jobs/1", json!({"n": 1}))).await;

    let cached = cache.get("jobs/1").await.expect("served from memory");
    assert_eq!(cached.payload, json!({"n": 1}));
    assert_eq!(cache.stats().persistent_items, 0);
    assert_eq!(cache.stats().memory_items, 1);
}

#[tokio::test]
async fn chaos_cache_read_failure_is_a_miss() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(FailingKv::new(Arc::new(InMemoryKv::new()), "io error"));
    let config = CacheConfig {
        max_memory_items: 1,
        ..Default::default()
    };
    let cache = BoundedCache::open(store.clone(), clock.clone(), config).await.unwrap();

    cache.set(entry(&clock, "jobs/1", json!({"n": 1}))).await;
    cache.set(entry(&clock, "jobs/2", json!({"n": 2}))).await;
    assert_eq!(cache.memory_keys(), vec!["jobs/2"]);

    store.break_reads();
    assert!(cache.get("jobs/1").await.is_none(), "unreadable tier degrades to a miss");

    store.heal();
    let recovered = cache.get("jobs/1").await.expect("index survived the failed read");
    assert_eq!(recovered.payload, json!({"n": 1}));
}

#[tokio::test]
async fn chaos_offline_write_failure_propagates() {
    let h = harness().await;
    h.store.break_writes();

    let err = h
        .client
        .mark_dirty("jobs/1", json!({"status": "done"}), Priority::High)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert!(err.is_terminal());
    assert_eq!(h.client.stats().pending_count, 0, "ledger untouched when the row was not written");

    let err = h
        .client
        .set("jobs/2", &json!({"n": 2}), SetOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));

    h.store.heal();
    h.client.mark_dirty("jobs/1", json!({"status": "done"}), Priority::High).await.unwrap();
    assert_eq!(h.client.stats().pending_count, 1);
}

#[tokio::test]
async fn chaos_record_write_failure_after_ledger_row_keeps_change_queued() {
    let h = harness().await;
    // ledger row lands, the record write right after it fails
    h.store.fail_writes_after(1);

    let result = h.client.mark_dirty("jobs/1", json!({"status": "done"}), Priority::High).await;
    assert!(matches!(result, Err(SyncError::Storage(_))));
    assert_eq!(h.client.stats().pending_count, 1);

    h.store.heal();
    assert!(h.client.perform_sync(true).await);
    assert_eq!(h.remote.document("jobs/1"), Some(json!({"status": "done"})));
    assert_eq!(h.client.stats().pending_count, 0);
}

#[tokio::test]
async fn chaos_storage_failure_mid_drain_aborts_cycle() {
    let h = harness().await;
    for i in 0..3 {
        h.client.mark_dirty(&format!("jobs/{}", i), json!({"n": i}), Priority::High).await.unwrap();
    }
    h.store.break_removes();

    assert!(!h.client.perform_sync(true).await);
    let report = h.client.last_report().unwrap();
    match report.outcome {
        SyncOutcome::Aborted {
            phase: SyncPhase::Draining,
            reason: AbortReason::Storage(ref msg),
        } => assert!(msg.contains("injected disk failure")),
        ref other => panic!("expected storage abort while draining, got {:?}", other),
    }
    assert_eq!(h.remote.write_log().len(), 1, "stopped after the first acknowledgement failed");
    assert_eq!(h.client.stats().pending_count, 3);
    assert!(!h.client.stats().circuit_open, "local failures never trip the breaker");

    h.store.heal();
    assert!(h.client.perform_sync(true).await);
    assert_eq!(h.client.stats().pending_count, 0);
    // the unacknowledged change is sent again; merge writes are idempotent
    assert_eq!(h.remote.write_log().len(), 4);
    assert_eq!(h.remote.document("jobs/0"), Some(json!({"n": 0})));
}

#[tokio::test]
async fn chaos_unreadable_store_fails_build() {
    let inner = Arc::new(InMemoryKv::new());
    let store = Arc::new(FailingKv::new(inner, "disk gone"));
    store.break_reads();

    let result = SyncClient::builder(Arc::new(InMemoryRemote::new()), store.clone())
        .build()
        .await;
    assert!(matches!(result, Err(SyncError::Storage(StorageError::Backend(_)))));
    assert!(store.calls() >= 1);
}

// =============================================================================
// Data Corruption
// =============================================================================

#[tokio::test]
async fn chaos_corrupt_cache_entry_dropped_on_open() {
    let inner = Arc::new(InMemoryKv::new());
    inner.set_string("cache:jobs/1", "{not json").await.unwrap();

    let h = harness_over(inner.clone()).await.unwrap();
    assert_eq!(h.client.stats().persistent_items, 0);
    assert_eq!(inner.get_string("cache:jobs/1").await.unwrap(), None);
}

#[tokio::test]
async fn chaos_corrupt_ledger_row_left_in_place() {
    let inner = Arc::new(InMemoryKv::new());
    {
        let h = harness_over(inner.clone()).await.unwrap();
        h.client.mark_dirty("jobs/1", json!({"n": 1}), Priority::High).await.unwrap();
    }
    inner.set_string("offline:pending:jobs/2", "\u{0}garbage").await.unwrap();

    let h = harness_over(inner.clone()).await.unwrap();
    assert_eq!(h.client.stats().pending_count, 1);
    assert!(
        inner.get_string("offline:pending:jobs/2").await.unwrap().is_some(),
        "unconfirmed data is never deleted silently"
    );

    assert!(h.client.perform_sync(true).await);
    assert_eq!(h.remote.write_log().len(), 1);
}

#[tokio::test]
async fn chaos_corrupt_offline_record_surfaces_on_read() {
    let h = harness().await;
    h.inner.set_string("offline:rec:jobs/1", "[1, 2").await.unwrap();
    h.remote.fail_always(RemoteOp::FetchOne, RemoteErrorKind::Unavailable);

    // remote down, fallback copy unreadable
    let err = h.client.get::<Value>("jobs/1").await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(StorageError::Corruption { .. })));
}

// =============================================================================
// Remote Faults
// =============================================================================

#[tokio::test]
async fn chaos_flaky_remote_absorbed_by_retries() {
    let h = harness().await;
    h.remote.insert("jobs/1", json!({"n": 1}));
    h.remote.fail_next(RemoteOp::FetchOne, 2, RemoteErrorKind::DeadlineExceeded);
    h.remote.fail_next(RemoteOp::Write, 3, RemoteErrorKind::Unavailable);

    let value: Option<Value> = h.client.get("jobs/1").await.unwrap();
    assert_eq!(value, Some(json!({"n": 1})));
    assert_eq!(h.remote.calls(RemoteOp::FetchOne), 3);

    h.client.mark_dirty("jobs/1", json!({"n": 2}), Priority::High).await.unwrap();
    assert!(h.client.perform_sync(true).await);
    assert_eq!(h.remote.calls(RemoteOp::Write), 4);
    assert_eq!(h.remote.document("jobs/1"), Some(json!({"n": 2})));
    assert!(!h.client.stats().circuit_open);
}

#[tokio::test]
async fn chaos_terminal_remote_error_is_not_retried() {
    let h = harness().await;
    h.remote.fail_next(RemoteOp::FetchOne, 1, RemoteErrorKind::PermissionDenied);

    let err = h.client.get::<Value>("jobs/1").await.unwrap_err();
    assert!(err.is_terminal());
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::PermissionDenied));
    assert_eq!(h.remote.calls(RemoteOp::FetchOne), 1);
}

#[tokio::test]
async fn chaos_clean_flag_never_restores_replaced_payload() {
    let clock = Arc::new(ManualClock::default());
    let inner = Arc::new(InMemoryKv::new());
    let store = Arc::new(StallingKv::new(inner.clone()));
    let cache = Arc::new(
        BoundedCache::open(store.clone(), clock.clone(), CacheConfig::default())
            .await
            .unwrap(),
    );
    cache.set(entry(&clock, "jobs/1", json!({"rev": 1})).with_dirty(true)).await;

    // the clean-flag update parks after reading the persisted row
    store.stall_next_read("cache:jobs/1");
    let clearing = tokio::spawn({
        let cache = cache.clone();
        async move { cache.set_dirty("jobs/1", false).await }
    });
    store.wait_stalled().await;

    let writing = tokio::spawn({
        let cache = cache.clone();
        let newer = entry(&clock, "jobs/1", json!({"rev": 2})).with_dirty(true);
        async move { cache.set(newer).await }
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    store.release();
    assert!(clearing.await.unwrap());
    writing.await.unwrap();

    let raw = inner.get_string("cache:jobs/1").await.unwrap().unwrap();
    let persisted: CacheEntry = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted.payload, json!({"rev": 2}));
    assert!(persisted.is_dirty, "the newer write lands after the clean flag");

    let cached = cache.get("jobs/1").await.unwrap();
    assert_eq!(cached.payload, json!({"rev": 2}));
    assert!(cached.is_dirty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_mutations_during_sync_are_not_lost() {
    let remote = Arc::new(InMemoryRemote::new());
    let monitor = ConnectivityMonitor::new(ConnectionType::Wifi);
    let kv = Arc::new(InMemoryKv::new());
    let client = Arc::new(
        SyncClient::builder(remote.clone(), kv.clone())
            .connectivity(monitor.subscribe())
            .config(fast_config())
            .build()
            .await
            .unwrap(),
    );

    let mut writers = Vec::new();
    for t in 0..4 {
        let client = client.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..25 {
                client
                    .mark_dirty(&format!("jobs/{}", t), json!({"n": i, "writer": t}), Priority::High)
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    let syncer = {
        let client = client.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                client.perform_sync(true).await;
                tokio::task::yield_now().await;
            }
        })
    };
    for w in writers {
        w.await.unwrap();
    }
    syncer.await.unwrap();

    // with everything settled, both cache tiers agree with the offline store
    for t in 0..4 {
        let key = format!("jobs/{}", t);
        let record = client.offline().get(&key).await.unwrap().expect("offline record");
        let pending = client.offline().has_pending(&key);

        let raw = kv.get_string(&format!("cache:{}", key)).await.unwrap().expect("persisted entry");
        let persisted: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.payload, record.payload, "{} persisted payload", key);
        assert_eq!(persisted.is_dirty, pending, "{} persisted dirty flag", key);

        let cached = client.cache().get(&key).await.expect("cached entry");
        assert_eq!(cached.payload, record.payload, "{} cached payload", key);
        assert_eq!(cached.is_dirty, pending, "{} cached dirty flag", key);
        assert_eq!(record.is_dirty, pending, "{} record dirty flag", key);
    }

    // a quiet cycle drains the tail and refreshes every key from the remote
    for _ in 0..3 {
        assert!(client.perform_sync(true).await);
        if client.stats().pending_count == 0 {
            break;
        }
    }
    assert_eq!(client.stats().pending_count, 0);
    for t in 0..4 {
        let expected = json!({"n": 24, "writer": t});
        assert_eq!(remote.document(&format!("jobs/{}", t)), Some(expected.clone()));
        let local: Option<Value> = client.get(&format!("jobs/{}", t)).await.unwrap();
        assert_eq!(local, Some(expected));
    }
}
