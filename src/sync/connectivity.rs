//! Connectivity signal consumed by the sync orchestrator.
//!
//! The host application owns network detection and pushes changes into a
//! [`ConnectivityMonitor`]; the orchestrator subscribes to it through a
//! `tokio::sync::watch` channel.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Offline,
}

impl ConnectionType {
    fn gauge_level(self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Cellular => 1,
            Self::Wifi => 2,
        }
    }
}

/// Current network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub connection_type: ConnectionType,
}

impl Connectivity {
    pub const OFFLINE: Self = Self {
        connection_type: ConnectionType::Offline,
    };
    pub const WIFI: Self = Self {
        connection_type: ConnectionType::Wifi,
    };
    pub const CELLULAR: Self = Self {
        connection_type: ConnectionType::Cellular,
    };

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connection_type != ConnectionType::Offline
    }

    #[must_use]
    pub fn is_wifi(&self) -> bool {
        self.connection_type == ConnectionType::Wifi
    }
}

impl From<ConnectionType> for Connectivity {
    fn from(connection_type: ConnectionType) -> Self {
        Self { connection_type }
    }
}

/// Publisher side of the connectivity signal.
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: ConnectionType) -> Self {
        let (tx, _) = watch::channel(Connectivity::from(initial));
        crate::metrics::set_connectivity(initial.gauge_level());
        Self { tx }
    }

    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Publish a change. Repeating the current state notifies nobody.
    pub fn set(&self, connection_type: ConnectionType) {
        let next = Connectivity::from(connection_type);
        let changed = self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(connection = ?connection_type, "Connectivity changed");
            crate::metrics::set_connectivity(connection_type.gauge_level());
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectionType::Wifi)
    }
}
