// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync client coordinator.
//!
//! The [`SyncClient`] is the single handle applications hold. It ties
//! together:
//! - the two-tier [`BoundedCache`](crate::cache::BoundedCache)
//! - the [`OfflineStore`](crate::offline::OfflineStore) and its pending-change ledger
//! - the [`RetryExecutor`](crate::resilience::RetryExecutor) and its shared circuit breaker
//! - the [`SyncOrchestrator`](crate::sync::SyncOrchestrator) background loop
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! Foreground operations work from `Created` on; [`SyncClient::start`] only
//! adds the background loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{ClientState, InMemoryKv, InMemoryRemote, SetOptions, SyncClient, SyncConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), offline_sync::SyncError> {
//! let client = SyncClient::builder(Arc::new(InMemoryRemote::new()), Arc::new(InMemoryKv::new()))
//!     .config(SyncConfig::default())
//!     .build()
//!     .await?;
//! assert_eq!(client.state(), ClientState::Created);
//!
//! client.set("job_1", &json!({"title": "Wire panel"}), SetOptions::default()).await?;
//! client.start().await?;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{ClientState, Fetched, Source, SyncStats};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::BoundedCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::offline::OfflineStore;
use crate::remote::RemoteStore;
use crate::resilience::{CircuitBreaker, RetryExecutor};
use crate::storage::KvStore;
use crate::sync::{Connectivity, LocalState, SyncOrchestrator};

/// Offline-first access to a remote document store.
///
/// # Thread Safety
///
/// The client is `Send + Sync`; share it behind an `Arc`. Internal state
/// uses atomics and short-lived locks.
pub struct SyncClient {
    /// Startup configuration
    pub(super) config: SyncConfig,

    /// Client state (broadcast to watchers)
    pub(super) state: watch::Sender<ClientState>,

    pub(super) remote: Arc<dyn RemoteStore>,

    /// Retry policy plus the breaker shared with the orchestrator
    pub(super) executor: RetryExecutor,

    /// Cache, offline store and clock
    pub(super) local: LocalState,

    pub(super) connectivity: watch::Receiver<Connectivity>,

    pub(super) orchestrator: Arc<SyncOrchestrator>,

    /// Handed to the background loop on start
    pub(super) config_rx: Mutex<Option<watch::Receiver<SyncConfig>>>,

    /// Background loop task
    pub(super) task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Start building a client over `remote` with local state in `kv`.
    pub fn builder(remote: Arc<dyn RemoteStore>, kv: Arc<dyn KvStore>) -> SyncClientBuilder {
        SyncClientBuilder {
            remote,
            kv,
            clock: None,
            config: SyncConfig::default(),
            config_rx: None,
            connectivity: None,
        }
    }

    /// Get current client state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<BoundedCache> {
        &self.local.cache
    }

    #[must_use]
    pub fn offline(&self) -> &Arc<OfflineStore> {
        &self.local.offline
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    pub(super) fn ensure_open(&self) -> Result<(), SyncError> {
        if self.state().is_open() {
            Ok(())
        } else {
            Err(SyncError::Closed)
        }
    }

    pub(super) fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
        crate::metrics::set_client_state(&state.to_string());
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.orchestrator.close();
    }
}

/// Builder for [`SyncClient`].
pub struct SyncClientBuilder {
    remote: Arc<dyn RemoteStore>,
    kv: Arc<dyn KvStore>,
    clock: Option<Arc<dyn Clock>>,
    config: SyncConfig,
    config_rx: Option<watch::Receiver<SyncConfig>>,
    connectivity: Option<watch::Receiver<Connectivity>>,
}

impl SyncClientBuilder {
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime config updates. The sync policy and sweep interval follow
    /// the channel; everything else is read once at build time.
    #[must_use]
    pub fn config_updates(mut self, rx: watch::Receiver<SyncConfig>) -> Self {
        self.config_rx = Some(rx);
        self
    }

    /// Connectivity signal, usually from a
    /// [`ConnectivityMonitor`](crate::sync::ConnectivityMonitor). Without one
    /// the client assumes a permanent Wi-Fi connection.
    #[must_use]
    pub fn connectivity(mut self, rx: watch::Receiver<Connectivity>) -> Self {
        self.connectivity = Some(rx);
        self
    }

    /// Time source for TTLs, retention and breaker cooldowns.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Open the local stores and wire the components together.
    ///
    /// Loads the cache index and the pending-change ledger from `kv`.
    /// Unreadable cache entries are dropped; unreadable ledger rows are
    /// logged and left in place. A store that cannot be listed is an error.
    #[tracing::instrument(skip(self))]
    pub async fn build(self) -> Result<SyncClient, SyncError> {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;

        let cache = BoundedCache::open(self.kv.clone(), clock.clone(), config.cache_config()).await?;
        let offline = OfflineStore::open(self.kv, clock.clone(), config.retention_policy()).await?;
        let local = LocalState::new(Arc::new(cache), Arc::new(offline), clock.clone());

        let breaker = Arc::new(CircuitBreaker::new("remote", config.circuit_config(), clock));
        let executor = RetryExecutor::new(config.retry_config(), breaker);

        let connectivity = self
            .connectivity
            .unwrap_or_else(|| watch::channel(Connectivity::WIFI).1);

        let orchestrator = Arc::new(SyncOrchestrator::new(
            self.remote.clone(),
            executor.clone(),
            local.clone(),
            connectivity.clone(),
            &config,
        ));

        let (state, _) = watch::channel(ClientState::Created);
        crate::metrics::set_client_state("Created");
        info!(
            pending = local.offline.pending_count(),
            cached = local.cache.stats().persistent_items,
            strategy = ?config.sync_strategy,
            "Sync client built"
        );

        Ok(SyncClient {
            config,
            state,
            remote: self.remote,
            executor,
            local,
            connectivity,
            orchestrator,
            config_rx: Mutex::new(self.config_rx),
            task: tokio::sync::Mutex::new(None),
        })
    }
}
