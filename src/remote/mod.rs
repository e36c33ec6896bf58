// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote document store contract.
//!
//! The core never talks to a concrete backend. It consumes [`RemoteStore`]
//! and classifies the [`RemoteError`]s it returns into retryable and terminal
//! categories (see [`RemoteErrorKind::class`]).

pub mod memory;

pub use memory::InMemoryRemote;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec::Decoder;
use crate::record::WriteMode;
use crate::resilience::retry::{Classify, ErrorClass};

/// A document returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Full document path, used as the local cache key
    pub path: String,
    pub data: Value,
}

impl Record {
    pub fn new(path: impl Into<String>, data: Value) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Decode the document body with a caller-supplied codec.
    pub fn decode<T, C: Decoder<T>>(&self, codec: &C) -> Result<T, serde_json::Error> {
        codec.decode(&self.data)
    }
}

/// Comparison used by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    /// Evaluate against a document body.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::NotEq => actual != &self.value,
            FilterOp::Contains => match actual {
                Value::Array(items) => items.contains(&self.value),
                Value::String(s) => self.value.as_str().is_some_and(|needle| s.contains(needle)),
                _ => false,
            },
            op => match compare(actual, &self.value) {
                Some(ord) => match op {
                    FilterOp::Lt => ord.is_lt(),
                    FilterOp::Lte => ord.is_le(),
                    FilterOp::Gt => ord.is_gt(),
                    FilterOp::Gte => ord.is_ge(),
                    _ => false,
                },
                None => false,
            },
        }
    }
}

/// Ordering of numbers and strings; other JSON types are incomparable.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A collection query: `fetch(collectionPath, filters, orderBy, limit, cursor)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub collection_path: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    /// Path of the last record of the previous page
    pub cursor: Option<String>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection_path: path.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn start_after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Acknowledgement of a remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub path: String,
    /// Remote commit time (epoch millis), if the backend reports one
    pub committed_at: Option<i64>,
}

/// Semantic failure categories of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Internal,
    Cancelled,
    Aborted,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Unauthenticated,
    Unimplemented,
    DataLoss,
    Unknown,
}

impl RemoteErrorKind {
    /// Transient availability problems are retryable; everything else,
    /// including unknown failures, is terminal.
    #[must_use]
    pub fn class(self) -> ErrorClass {
        match self {
            Self::Unavailable
            | Self::DeadlineExceeded
            | Self::ResourceExhausted
            | Self::Internal
            | Self::Cancelled
            | Self::Aborted => ErrorClass::Retryable,
            Self::PermissionDenied
            | Self::NotFound
            | Self::AlreadyExists
            | Self::FailedPrecondition
            | Self::Unauthenticated
            | Self::Unimplemented
            | Self::DataLoss
            | Self::Unknown => ErrorClass::Terminal,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::FailedPrecondition => "failed_precondition",
            Self::Unauthenticated => "unauthenticated",
            Self::Unimplemented => "unimplemented",
            Self::DataLoss => "data_loss",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, message)
    }
}

impl Classify for RemoteError {
    fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

/// The remote document API the core protects with retries and a breaker.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, RemoteError>;
    async fn fetch_one(&self, path: &str) -> Result<Option<Record>, RemoteError>;
    async fn write(&self, path: &str, patch: &Value, mode: WriteMode) -> Result<WriteAck, RemoteError>;

    /// Live updates for documents under `path` matching `filters`.
    ///
    /// Errors are delivered in-band; the stream ends after yielding one.
    fn subscribe(&self, path: &str, filters: &[Filter]) -> BoxStream<'static, Result<Record, RemoteError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_table() {
        use RemoteErrorKind::*;
        for kind in [Unavailable, DeadlineExceeded, ResourceExhausted, Internal, Cancelled, Aborted] {
            assert_eq!(kind.class(), ErrorClass::Retryable, "{} should retry", kind);
        }
        for kind in [
            PermissionDenied,
            NotFound,
            AlreadyExists,
            FailedPrecondition,
            Unauthenticated,
            Unimplemented,
            DataLoss,
            Unknown,
        ] {
            assert_eq!(kind.class(), ErrorClass::Terminal, "{} should not retry", kind);
        }
    }

    #[test]
    fn test_error_display() {
        let err = RemoteError::unavailable("backend restarting");
        assert_eq!(err.to_string(), "unavailable: backend restarting");
        assert_eq!(err.class(), ErrorClass::Retryable);
    }

    #[test]
    fn test_filter_matching() {
        let doc = json!({"status": "open", "crew": 4, "tags": ["night"], "site": "North Yard"});

        assert!(Filter::eq("status", json!("open")).matches(&doc));
        assert!(!Filter::eq("status", json!("closed")).matches(&doc));
        assert!(Filter { field: "crew".into(), op: FilterOp::Gte, value: json!(4) }.matches(&doc));
        assert!(!Filter { field: "crew".into(), op: FilterOp::Lt, value: json!(4) }.matches(&doc));
        assert!(Filter { field: "tags".into(), op: FilterOp::Contains, value: json!("night") }.matches(&doc));
        assert!(Filter { field: "site".into(), op: FilterOp::Contains, value: json!("Yard") }.matches(&doc));
        assert!(!Filter::eq("missing", json!(1)).matches(&doc));
    }

    #[test]
    fn test_query_builder() {
        let q = Query::collection("jobs")
            .filter(Filter::eq("status", json!("open")))
            .order_by("created", true)
            .limit(20)
            .start_after("jobs/9");

        assert_eq!(q.collection_path, "jobs");
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.limit, Some(20));
        assert_eq!(q.cursor.as_deref(), Some("jobs/9"));
        assert!(q.order_by.unwrap().descending);
    }
}
