// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Top-level error returned by [`SyncClient`](crate::SyncClient).
//!
//! Callers usually only need the three questions the helpers answer:
//! was the service degraded ([`SyncError::is_circuit_open`]), is it worth
//! asking the user to retry ([`SyncError::is_transient`]), or did this
//! particular request fail for good ([`SyncError::is_terminal`]).

use thiserror::Error;

use crate::remote::RemoteError;
use crate::resilience::RetryError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A protected remote call failed or was refused by the breaker
    #[error(transparent)]
    Remote(#[from] RetryError<RemoteError>),

    /// The local store failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A value could not be converted to or from its stored form
    #[error("codec error for '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The client has been shut down
    #[error("sync client is shut down")]
    Closed,
}

impl SyncError {
    /// Service degraded: the remote was not contacted.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Remote(e) if e.is_circuit_open())
    }

    /// Retryable failure that outlived the retry budget.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Remote(RetryError::Exhausted { .. }))
    }

    /// Permanent failure of this request.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_terminal(),
            Self::Storage(_) | Self::Codec { .. } => true,
            Self::Closed => false,
        }
    }

    /// The remote failure category, if the remote answered.
    #[must_use]
    pub fn remote_kind(&self) -> Option<crate::remote::RemoteErrorKind> {
        match self {
            Self::Remote(e) => e.inner().map(|r| r.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteErrorKind;

    #[test]
    fn test_classification_helpers() {
        let open = SyncError::from(RetryError::<RemoteError>::CircuitOpen {
            operation: "fetch_one job_1".into(),
        });
        assert!(open.is_circuit_open());
        assert!(!open.is_transient());
        assert!(!open.is_terminal());
        assert_eq!(open.remote_kind(), None);

        let exhausted = SyncError::from(RetryError::Exhausted {
            operation: "write job_1".into(),
            attempts: 4,
            source: RemoteError::unavailable("down"),
        });
        assert!(exhausted.is_transient());
        assert_eq!(exhausted.remote_kind(), Some(RemoteErrorKind::Unavailable));

        let terminal = SyncError::from(RetryError::Terminal {
            operation: "write job_1".into(),
            attempts: 1,
            source: RemoteError::permission_denied("nope"),
        });
        assert!(terminal.is_terminal());
        assert!(terminal.to_string().contains("permission_denied: nope"));
    }

    #[test]
    fn test_storage_error_is_terminal() {
        let err = SyncError::from(StorageError::Backend("disk full".into()));
        assert!(err.is_terminal());
        assert!(err.to_string().contains("disk full"));
    }
}
