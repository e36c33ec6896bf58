//! # Offline Sync
//!
//! Resilient access to a remote document store for clients with unreliable
//! connectivity: a bounded two-tier cache, a durable queue of local
//! mutations, and a sync loop that pushes and refreshes when the network
//! allows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncClient                          │
//! │  • get / fetch / set / mark_dirty / query / subscribe       │
//! │  • perform_sync, stats, clear                               │
//! └─────────────────────────────────────────────────────────────┘
//!            │                     │                    │
//!            ▼                     ▼                    ▼
//! ┌──────────────────┐  ┌────────────────────┐  ┌──────────────────┐
//! │   BoundedCache   │  │    OfflineStore    │  │  RetryExecutor   │
//! │ • LRU memory tier│  │ • retained records │  │ • backoff+jitter │
//! │ • TTL per entry  │  │ • pending-change   │  │ • CircuitBreaker │
//! │ • byte ceiling   │  │   ledger           │  │   (shared)       │
//! └──────────────────┘  └────────────────────┘  └──────────────────┘
//!            │                     │                    │
//!            └──────── KvStore ────┘               RemoteStore
//!                (SQLite / memory)
//!
//! SyncOrchestrator: drain ledger → refresh High → refresh Medium/Low → cleanup
//!   triggered by connectivity, timer, or explicit request per SyncStrategy
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{
//!     ConnectionType, ConnectivityMonitor, InMemoryRemote, Priority, SetOptions, SqliteKv,
//!     SyncClient, SyncConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), offline_sync::SyncError> {
//!     let kv = Arc::new(SqliteKv::open("offline.db").await?);
//!     let monitor = ConnectivityMonitor::new(ConnectionType::Wifi);
//!
//!     let client = SyncClient::builder(Arc::new(InMemoryRemote::new()), kv)
//!         .config(SyncConfig::default())
//!         .connectivity(monitor.subscribe())
//!         .build()
//!         .await?;
//!     client.start().await?;
//!
//!     // Local write, readable immediately
//!     client.set("job_1", &json!({"title": "Wire panel"}), SetOptions::default()).await?;
//!
//!     // Mutation queued for the remote; survives restarts until confirmed
//!     client.mark_dirty("job_1", json!({"status": "done"}), Priority::High).await?;
//!
//!     // Cache → remote → offline copy
//!     let job: Option<serde_json::Value> = client.get("job_1").await?;
//!     println!("{:?}", job);
//!
//!     client.perform_sync(true).await;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Two-tier cache**: LRU memory tier over a size-bounded persistent tier
//! - **Offline fallback**: stale local data instead of an error when the remote fails
//! - **Durable mutations**: pending changes merged per key and drained by priority
//! - **Retry + circuit breaker**: exponential backoff with jitter, fail-fast when degraded
//! - **Sync strategies**: Immediate, Scheduled, Manual, Smart; Wi-Fi restrictions
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncClient`] tying all components together
//! - [`cache`]: Two-tier bounded cache
//! - [`offline`]: Offline records and the pending-change ledger
//! - [`sync`]: Connectivity, strategies and the sync orchestrator
//! - [`resilience`]: Retry executor and circuit breaker
//! - [`remote`]: Remote store contract and an in-memory implementation
//! - [`storage`]: Local key-value stores (SQLite, memory)
//! - [`eviction`]: LRU structure and size/age victim selection

pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod eviction;
pub mod metrics;
pub mod offline;
pub mod record;
pub mod remote;
pub mod resilience;
pub mod set_options;
pub mod storage;
pub mod sync;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use cache::{BoundedCache, CacheConfig, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, Decoder, Encoder, JsonCodec};
pub use config::SyncConfig;
pub use coordinator::{ClientState, Fetched, Source, SyncClient, SyncClientBuilder, SyncStats};
pub use error::SyncError;
pub use offline::{OfflineStore, Retention, RetentionPolicy, StoredRecord};
pub use record::{CacheEntry, PendingChange, Priority, WriteMode};
pub use remote::{Filter, FilterOp, InMemoryRemote, Query, Record, RemoteError, RemoteErrorKind, RemoteStore, WriteAck};
pub use resilience::{CircuitBreaker, CircuitConfig, CircuitState, Classify, ErrorClass, RetryConfig, RetryError, RetryExecutor};
pub use set_options::SetOptions;
pub use storage::{InMemoryKv, KvStore, SqliteKv, StorageError};
pub use sync::{
    ConnectionType, Connectivity, ConnectivityMonitor, SyncPhase, SyncPolicy, SyncReport, SyncStrategy, SyncTrigger,
};
pub use metrics::LatencyTimer;
