// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`RemoteStore`] with scripted fault injection.
//!
//! Documents live in an ordered map keyed by path. Each operation kind has
//! its own failure script: a queue of one-shot errors plus an optional
//! "fail every call" error, so tests can reproduce outages precisely.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{compare, Filter, Query, Record, RemoteError, RemoteErrorKind, RemoteStore, WriteAck};
use crate::record::{apply_delta, WriteMode};

/// Operation selector for fault scripts and call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Fetch,
    FetchOne,
    Write,
    Subscribe,
}

#[derive(Default)]
struct FaultScript {
    queued: VecDeque<RemoteError>,
    always: Option<RemoteError>,
}

pub struct InMemoryRemote {
    docs: RwLock<BTreeMap<String, Value>>,
    faults: Mutex<HashMap<RemoteOp, FaultScript>>,
    calls: [AtomicU64; 4],
    writes: Mutex<Vec<(String, Value, WriteMode)>>,
    updates: broadcast::Sender<Record>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            docs: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(HashMap::new()),
            calls: Default::default(),
            writes: Mutex::new(Vec::new()),
            updates,
        }
    }

    /// Seed a document without going through `write` (no log, no counters).
    pub fn insert(&self, path: impl Into<String>, data: Value) {
        let record = Record::new(path, data);
        self.docs.write().insert(record.path.clone(), record.data.clone());
        let _ = self.updates.send(record);
    }

    #[must_use]
    pub fn document(&self, path: &str) -> Option<Value> {
        self.docs.read().get(path).cloned()
    }

    /// Fail the next `n` calls of `op` with `kind`.
    pub fn fail_next(&self, op: RemoteOp, n: usize, kind: RemoteErrorKind) {
        let mut faults = self.faults.lock();
        let script = faults.entry(op).or_default();
        for i in 0..n {
            script
                .queued
                .push_back(RemoteError::new(kind, format!("injected {:?} failure #{}", op, i + 1)));
        }
    }

    /// Fail every call of `op` until [`heal`](Self::heal).
    pub fn fail_always(&self, op: RemoteOp, kind: RemoteErrorKind) {
        self.faults.lock().entry(op).or_default().always =
            Some(RemoteError::new(kind, format!("injected {:?} outage", op)));
    }

    /// Clear every fault script.
    pub fn heal(&self) {
        self.faults.lock().clear();
    }

    /// How many times `op` was invoked (including injected failures).
    #[must_use]
    pub fn calls(&self, op: RemoteOp) -> u64 {
        self.calls[op as usize].load(Ordering::Acquire)
    }

    /// Successful writes in the order they were applied.
    #[must_use]
    pub fn write_log(&self) -> Vec<(String, Value, WriteMode)> {
        self.writes.lock().clone()
    }

    fn enter(&self, op: RemoteOp) -> Result<(), RemoteError> {
        self.calls[op as usize].fetch_add(1, Ordering::AcqRel);
        let mut faults = self.faults.lock();
        let Some(script) = faults.get_mut(&op) else {
            return Ok(());
        };
        if let Some(err) = script.queued.pop_front() {
            debug!(?op, error = %err, "Injected remote failure");
            return Err(err);
        }
        match &script.always {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn in_collection(path: &str, collection: &str) -> bool {
    path.strip_prefix(collection)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn matches_all(filters: &[Filter], doc: &Value) -> bool {
    filters.iter().all(|f| f.matches(doc))
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, RemoteError> {
        self.enter(RemoteOp::Fetch)?;

        let mut records: Vec<Record> = self
            .docs
            .read()
            .iter()
            .filter(|(path, doc)| in_collection(path, &query.collection_path) && matches_all(&query.filters, doc))
            .map(|(path, doc)| Record::new(path.clone(), doc.clone()))
            .collect();

        if let Some(ref order) = query.order_by {
            records.sort_by(|a, b| {
                let ord = match (a.data.get(&order.field), b.data.get(&order.field)) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(std::cmp::Ordering::Equal),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(ref cursor) = query.cursor {
            match records.iter().position(|r| &r.path == cursor) {
                Some(idx) => {
                    records.drain(..=idx);
                }
                None => {
                    return Err(RemoteError::new(
                        RemoteErrorKind::FailedPrecondition,
                        format!("unknown cursor {}", cursor),
                    ))
                }
            }
        }

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn fetch_one(&self, path: &str) -> Result<Option<Record>, RemoteError> {
        self.enter(RemoteOp::FetchOne)?;
        Ok(self
            .docs
            .read()
            .get(path)
            .map(|doc| Record::new(path, doc.clone())))
    }

    async fn write(&self, path: &str, patch: &Value, mode: WriteMode) -> Result<WriteAck, RemoteError> {
        self.enter(RemoteOp::Write)?;

        let updated = {
            let mut docs = self.docs.write();
            let next = apply_delta(docs.get(path), patch, mode);
            docs.insert(path.to_string(), next.clone());
            next
        };
        self.writes.lock().push((path.to_string(), patch.clone(), mode));
        let _ = self.updates.send(Record::new(path, updated));

        Ok(WriteAck {
            path: path.to_string(),
            committed_at: None,
        })
    }

    fn subscribe(&self, path: &str, filters: &[Filter]) -> BoxStream<'static, Result<Record, RemoteError>> {
        if let Err(e) = self.enter(RemoteOp::Subscribe) {
            return stream::once(async move { Err(e) }).boxed();
        }

        let path = path.to_string();
        let filters = filters.to_vec();
        let wanted = move |record: &Record| {
            (record.path == path || in_collection(&record.path, &path)) && matches_all(&filters, &record.data)
        };

        let snapshot: Vec<Result<Record, RemoteError>> = self
            .docs
            .read()
            .iter()
            .map(|(p, d)| Record::new(p.clone(), d.clone()))
            .filter(|r| wanted(r))
            .map(Ok)
            .collect();

        let live = stream::unfold(self.updates.subscribe(), move |mut rx| {
            let wanted = wanted.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(record) if wanted(&record) => return Some((Ok(record), rx)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            let err = RemoteError::new(
                                RemoteErrorKind::ResourceExhausted,
                                format!("subscriber lagged by {} updates", skipped),
                            );
                            return Some((Err(err), rx));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        stream::iter(snapshot).chain(live).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_one_and_write_merge() {
        let remote = InMemoryRemote::new();
        remote.insert("jobs/1", json!({"status": "open", "crew": 2}));

        remote
            .write("jobs/1", &json!({"status": "closed"}), WriteMode::Merge)
            .await
            .unwrap();

        let doc = remote.fetch_one("jobs/1").await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"status": "closed", "crew": 2}));
        assert_eq!(remote.write_log().len(), 1);
        assert!(remote.fetch_one("jobs/2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_filters_orders_and_pages() {
        let remote = InMemoryRemote::new();
        for i in 1..=5 {
            remote.insert(format!("jobs/{}", i), json!({"n": i, "open": i % 2 == 1}));
        }
        remote.insert("crews/1", json!({"n": 100, "open": true}));

        let q = Query::collection("jobs")
            .filter(Filter::eq("open", json!(true)))
            .order_by("n", true);
        let page: Vec<_> = remote.fetch(&q).await.unwrap().into_iter().map(|r| r.path).collect();
        assert_eq!(page, vec!["jobs/5", "jobs/3", "jobs/1"]);

        let next = remote.fetch(&q.clone().start_after("jobs/5").limit(1)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].path, "jobs/3");
    }

    #[tokio::test]
    async fn test_fault_script_then_recovery() {
        let remote = InMemoryRemote::new();
        remote.insert("a", json!(1));
        remote.fail_next(RemoteOp::FetchOne, 2, RemoteErrorKind::Unavailable);

        assert!(remote.fetch_one("a").await.is_err());
        assert!(remote.fetch_one("a").await.is_err());
        assert!(remote.fetch_one("a").await.unwrap().is_some());
        assert_eq!(remote.calls(RemoteOp::FetchOne), 3);
    }

    #[tokio::test]
    async fn test_fail_always_until_heal() {
        let remote = InMemoryRemote::new();
        remote.fail_always(RemoteOp::Write, RemoteErrorKind::PermissionDenied);

        let err = remote.write("a", &json!(1), WriteMode::Replace).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::PermissionDenied);

        remote.heal();
        assert!(remote.write("a", &json!(1), WriteMode::Replace).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_snapshot_then_live() {
        let remote = InMemoryRemote::new();
        remote.insert("jobs/1", json!({"open": true}));
        remote.insert("jobs/2", json!({"open": false}));

        let mut stream = remote.subscribe("jobs", &[Filter::eq("open", json!(true))]);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.path, "jobs/1");

        remote.insert("jobs/3", json!({"open": true}));
        let live = stream.next().await.unwrap().unwrap();
        assert_eq!(live.path, "jobs/3");
    }

    #[tokio::test]
    async fn test_subscribe_injected_failure() {
        let remote = InMemoryRemote::new();
        remote.fail_next(RemoteOp::Subscribe, 1, RemoteErrorKind::Unavailable);

        let mut stream = remote.subscribe("jobs", &[]);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
