//! Property-based tests (fuzzing) for the offline sync layer.
//!
//! Uses proptest to check the cache, backoff and ledger invariants over
//! random inputs, and to feed malformed data to every decoder to verify
//! nothing panics.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use offline_sync::eviction::LruMap;
use offline_sync::record::apply_delta;
use offline_sync::{
    BoundedCache, CacheConfig, CacheEntry, Clock, Decoder, Encoder, Filter, InMemoryKv, JsonCodec, ManualClock, OfflineStore,
    PendingChange, Priority, Retention, RetentionPolicy, RetryConfig, StoredRecord, WriteMode,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Medium), Just(Priority::Low)]
}

/// Flat JSON objects, the shape of merge-patch deltas
fn flat_object_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::hash_map("[a-e]", any::<i32>(), 0..5).prop_map(|m| {
        m.into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect::<Map<String, Value>>()
    })
}

/// Deltas as callers queue them: mostly merge-patch objects, sometimes scalars
fn delta_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => flat_object_strategy().prop_map(Value::Object),
        1 => any::<i32>().prop_map(Value::from),
        1 => Just(Value::Null),
    ]
}

fn write_mode_strategy() -> impl Strategy<Value = WriteMode> {
    prop_oneof![Just(WriteMode::Merge), Just(WriteMode::Replace)]
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,  // depth
        64, // max nodes
        10, // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

#[derive(Debug, Clone)]
enum LruOp {
    Insert(u8),
    Get(u8),
    Remove(u8),
}

fn lru_op_strategy() -> impl Strategy<Value = LruOp> {
    prop_oneof![
        (0u8..12).prop_map(LruOp::Insert),
        (0u8..12).prop_map(LruOp::Get),
        (0u8..12).prop_map(LruOp::Remove),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// TTL
// =============================================================================

proptest! {
    /// An entry is live exactly until its TTL has fully elapsed
    #[test]
    fn prop_entry_expiry_matches_ttl(
        now in 0i64..4_000_000_000_000,
        ttl_ms in 0u64..10_000_000,
        elapsed_ms in 0i64..20_000_000,
    ) {
        let entry = CacheEntry::new("k", json!(1), now, Duration::from_millis(ttl_ms), Priority::Medium);
        prop_assert_eq!(entry.is_expired(now + elapsed_ms), elapsed_ms > ttl_ms as i64);
    }

    /// Through the cache: a lookup after the TTL never returns the entry
    #[test]
    fn prop_cache_never_serves_expired(ttl_secs in 1u64..7200, elapsed_secs in 0u64..14_400) {
        let rt = runtime();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::default());
            let cache = BoundedCache::open(Arc::new(InMemoryKv::new()), clock.clone(), CacheConfig::default())
                .await
                .unwrap();
            let ttl = Duration::from_secs(ttl_secs);
            cache.set(CacheEntry::new("k", json!({"v": 1}), clock.now_millis(), ttl, Priority::Low)).await;

            clock.advance(Duration::from_secs(elapsed_secs));
            let hit = cache.get("k").await;
            prop_assert_eq!(hit.is_some(), elapsed_secs <= ttl_secs);
            Ok(())
        })?;
    }
}

// =============================================================================
// LRU
// =============================================================================

proptest! {
    /// LruMap with capacity eviction agrees with a simple recency list
    #[test]
    fn prop_lru_matches_model(capacity in 1usize..6, ops in prop::collection::vec(lru_op_strategy(), 0..80)) {
        let mut lru: LruMap<u8, u8> = LruMap::with_capacity(capacity);
        // most recent at the back
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                LruOp::Insert(k) => {
                    lru.insert(k, k);
                    model.retain(|m| *m != k);
                    model.push_back(k);
                    while lru.len() > capacity {
                        let (evicted, _) = lru.pop_lru().unwrap();
                        prop_assert_eq!(Some(evicted), model.pop_front());
                    }
                }
                LruOp::Get(k) => {
                    let found = lru.get(&k).copied();
                    prop_assert_eq!(found.is_some(), model.contains(&k));
                    if found.is_some() {
                        model.retain(|m| *m != k);
                        model.push_back(k);
                    }
                }
                LruOp::Remove(k) => {
                    let removed = lru.remove(&k);
                    prop_assert_eq!(removed.is_some(), model.contains(&k));
                    model.retain(|m| *m != k);
                }
            }
            prop_assert!(lru.len() <= capacity);
        }

        prop_assert_eq!(lru.keys_lru_first(), model.into_iter().collect::<Vec<_>>());
    }

    /// The memory tier never holds more than its configured capacity
    #[test]
    fn prop_memory_tier_bounded(capacity in 1usize..8, keys in prop::collection::vec(0u8..20, 1..60)) {
        let rt = runtime();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::default());
            let config = CacheConfig { max_memory_items: capacity, ..Default::default() };
            let cache = BoundedCache::open(Arc::new(InMemoryKv::new()), clock.clone(), config).await.unwrap();
            for k in &keys {
                let key = format!("k{}", k);
                cache.set(CacheEntry::new(key, json!(k), clock.now_millis(), Duration::from_secs(60), Priority::Medium)).await;
                prop_assert!(cache.memory_len() <= capacity);
            }
            let last = format!("k{}", keys[keys.len() - 1]);
            let resident = cache.memory_keys();
            prop_assert_eq!(resident.last(), Some(&last));
            Ok(())
        })?;
    }
}

// =============================================================================
// Backoff
// =============================================================================

proptest! {
    /// Every retry delay stays within the jitter band around the capped exponential
    #[test]
    fn prop_backoff_within_bounds(
        initial_ms in 1u64..2_000,
        max_ms in 1u64..60_000,
        jitter in 0.0f64..0.5,
        n in 0u32..40,
    ) {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            max_retries: 3,
            jitter,
        };
        let expected = (initial_ms as f64 * 2f64.powi(n as i32)).min(max_ms as f64) / 1000.0;
        let nominal = config.nominal_delay(n).as_secs_f64();
        prop_assert!((nominal - expected).abs() < 1e-6, "nominal {} expected {}", nominal, expected);

        let actual = config.delay_for(n).as_secs_f64();
        prop_assert!(actual >= nominal * (1.0 - jitter) - 1e-6);
        prop_assert!(actual <= nominal * (1.0 + jitter) + 1e-6);
    }

    /// Nominal delays never shrink as attempts grow
    #[test]
    fn prop_backoff_monotonic(initial_ms in 1u64..2_000, max_ms in 1u64..60_000, n in 0u32..40) {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            max_retries: 3,
            jitter: 0.0,
        };
        prop_assert!(config.nominal_delay(n) <= config.nominal_delay(n + 1));
        prop_assert_eq!(config.delay_for(n), config.nominal_delay(n));
    }
}

// =============================================================================
// Ledger ordering and merging
// =============================================================================

proptest! {
    /// Drain order is by priority tier, then first-recorded order within a tier
    #[test]
    fn prop_drain_order(marks in prop::collection::vec((0u8..10, priority_strategy()), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::default());
            let store = OfflineStore::open(Arc::new(InMemoryKv::new()), clock.clone(), RetentionPolicy::default())
                .await
                .unwrap();

            let mut first_seen: Vec<String> = Vec::new();
            let mut best: HashMap<String, Priority> = HashMap::new();
            for (i, (k, priority)) in marks.iter().enumerate() {
                let key = format!("jobs/{}", k);
                store
                    .mark_dirty(&key, json!({"i": i}), WriteMode::Merge, *priority, Retention::Transient)
                    .await
                    .unwrap();
                if !first_seen.contains(&key) {
                    first_seen.push(key.clone());
                }
                let entry = best.entry(key).or_insert(*priority);
                *entry = (*entry).min(*priority);
                clock.advance(Duration::from_millis(1));
            }

            let drained: Vec<PendingChange> = store.pending_sorted();
            prop_assert_eq!(drained.len(), first_seen.len());
            for pair in drained.windows(2) {
                prop_assert!(pair[0].drain_key() < pair[1].drain_key());
            }
            for change in &drained {
                prop_assert_eq!(Some(&change.priority), best.get(&change.key));
                prop_assert_eq!(&change.delta, &json!({"i": marks.iter().rposition(|(k, _)| format!("jobs/{}", k) == change.key).unwrap()}));
            }

            let expected: Vec<String> = Priority::ALL
                .iter()
                .flat_map(|p| first_seen.iter().filter(|k| best[*k] == *p).cloned().collect::<Vec<_>>())
                .collect();
            prop_assert_eq!(drained.into_iter().map(|c| c.key).collect::<Vec<_>>(), expected);
            Ok(())
        })?;
    }

    /// Folding two queued deltas then applying equals applying them in turn
    #[test]
    fn prop_absorbed_delta_equals_sequential_apply(
        base in prop::option::of(delta_strategy()),
        first in delta_strategy(),
        first_mode in write_mode_strategy(),
        second in delta_strategy(),
        second_mode in write_mode_strategy(),
    ) {
        let stepwise = apply_delta(Some(&apply_delta(base.as_ref(), &first, first_mode)), &second, second_mode);

        let mut change = PendingChange::new("k", first, first_mode, Priority::Low, 0, 0);
        change.absorb(second, second_mode, Priority::High, 1);
        prop_assert_eq!(change.apply_to(base.as_ref()), stepwise);
        prop_assert_eq!(change.priority, Priority::High);
    }

    /// A replace wipes everything queued before it
    #[test]
    fn prop_replace_wins(first in flat_object_strategy(), replacement in arbitrary_json_strategy()) {
        let mut change = PendingChange::new("k", Value::Object(first), WriteMode::Merge, Priority::Medium, 0, 0);
        change.absorb(replacement.clone(), WriteMode::Replace, Priority::Low, 1);
        prop_assert_eq!(change.mode, WriteMode::Replace);
        prop_assert_eq!(change.apply_to(Some(&json!({"stale": true}))), replacement);
    }
}

// =============================================================================
// Deserialization Fuzz Tests
// =============================================================================

proptest! {
    /// Persisted rows never panic on arbitrary bytes
    #[test]
    fn fuzz_rows_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = serde_json::from_slice::<CacheEntry>(&bytes);
        let _ = serde_json::from_slice::<PendingChange>(&bytes);
        let _ = serde_json::from_slice::<StoredRecord>(&bytes);
    }

    /// Arbitrary JSON either decodes into a row shape or fails cleanly
    #[test]
    fn fuzz_rows_from_arbitrary_json(json in arbitrary_json_strategy()) {
        let serialized = serde_json::to_vec(&json).unwrap();
        let _ = serde_json::from_slice::<CacheEntry>(&serialized);
        let _ = serde_json::from_slice::<PendingChange>(&serialized);
        let _ = serde_json::from_slice::<StoredRecord>(&serialized);
    }

    /// The typed codec reports a mismatch instead of panicking
    #[test]
    fn fuzz_codec_decode(json in arbitrary_json_strategy()) {
        #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
        struct Job {
            title: String,
            hours: u32,
        }
        let codec = JsonCodec::<Job>::new();
        if let Ok(job) = codec.decode(&json) {
            prop_assert_eq!(codec.decode(&codec.encode(&job).unwrap()).unwrap(), job);
        }
    }

    /// Filters evaluate against any document shape without panicking
    #[test]
    fn fuzz_filter_matches(field in "[a-c]{1,2}", value in arbitrary_json_strategy(), doc in arbitrary_json_strategy()) {
        let filter = Filter::eq(field.clone(), value.clone());
        let matched = filter.matches(&doc);
        if let Some(actual) = doc.get(&field) {
            prop_assert_eq!(matched, actual == &value);
        }
    }

    /// Deltas of any shape apply without panicking; non-object merges replace
    #[test]
    fn fuzz_apply_delta(base in prop::option::of(arbitrary_json_strategy()), delta in arbitrary_json_strategy()) {
        let merged = apply_delta(base.as_ref(), &delta, WriteMode::Merge);
        if !delta.is_object() {
            prop_assert_eq!(&merged, &delta);
        }
        prop_assert_eq!(apply_delta(base.as_ref(), &delta, WriteMode::Replace), delta);
    }
}
