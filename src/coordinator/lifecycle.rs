// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Start and shutdown.

use std::time::Instant;

use tracing::{info, warn};

use super::{ClientState, SyncClient};
use crate::error::SyncError;

impl SyncClient {
    /// Start the background sync loop.
    ///
    /// Purges offline records past their retention first. Calling `start`
    /// on a running client is a no-op; on a stopped client it fails with
    /// [`SyncError::Closed`].
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SyncError> {
        match self.state() {
            ClientState::Created => {}
            ClientState::Running => return Ok(()),
            ClientState::ShuttingDown | ClientState::Stopped => return Err(SyncError::Closed),
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let purged = self.local.offline.purge_expired().await?;
        let swept = self.local.cache.sweep().await;
        let pending = self.local.offline.pending_count();
        if pending > 0 {
            info!(pending, "Recovered pending changes from previous session");
        }
        info!(purged, swept, "Startup cleanup complete");

        let config_rx = self.config_rx.lock().take();
        *task = Some(tokio::spawn(self.orchestrator.clone().run(config_rx)));

        self.set_state(ClientState::Running);
        info!("Sync client running");
        Ok(())
    }

    /// Initiate graceful shutdown.
    ///
    /// Stops the background loop (a cycle in progress stops at its next
    /// phase boundary) and waits for it. Pending changes stay in the ledger
    /// for the next session.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.state() == ClientState::Stopped {
            return;
        }
        let shutdown_start = Instant::now();
        info!("Initiating sync client shutdown...");
        self.set_state(ClientState::ShuttingDown);

        self.orchestrator.close();
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync loop ended abnormally");
            }
        }

        let pending = self.local.offline.pending_count();
        self.set_state(ClientState::Stopped);
        crate::metrics::record_latency("shutdown", shutdown_start.elapsed());
        info!(pending, "Sync client shutdown complete");
    }
}
