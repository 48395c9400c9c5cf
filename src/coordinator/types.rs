//! Public types for the sync service coordinator.

use thiserror::Error;

use crate::operation::OperationId;
use crate::resilience::oplog::QueueStats;
use crate::row::Row;
use crate::storage::traits::{RemoteError, StorageError};

/// Service lifecycle state.
///
/// Use [`super::SheetSync::state()`] to check the current state or
/// [`super::SheetSync::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Just created, not yet started
    Created,
    /// Opening the operation log and recovering in-flight records
    OpeningLog,
    /// Initial fetch of every configured table
    Populating,
    /// Accepting reads and writes, background tasks not spawned yet
    Ready,
    /// Worker and periodic refresh running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Background tasks gone, operation log closed
    Stopped,
}

impl ServiceState {
    /// Whether mutations are accepted in this state.
    #[must_use]
    pub fn accepts_writes(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::OpeningLog => write!(f, "OpeningLog"),
            Self::Populating => write!(f, "Populating"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Receipt for an accepted mutation.
///
/// The mutation is durable and already visible in the cache; the remote
/// write has not happened yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub operation_id: OperationId,
    /// For CREATE: echo of the payload as it was patched into the cache.
    /// Not confirmed remote state.
    pub provisional: Option<Row>,
    /// Cached rows the optimistic patch touched
    pub rows_patched: usize,
}

/// Result of refreshing one or more tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// (table, rows loaded)
    pub refreshed: Vec<(String, usize)>,
    /// (table, error message)
    pub failed: Vec<(String, String)>,
}

impl RefreshReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Snapshot of service health for readiness/liveness endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub state: ServiceState,
    /// Accepting writes
    pub ready: bool,
    /// Initial population finished
    pub populated: bool,
    /// Operation log answered `SELECT 1`
    pub log_reachable: bool,
    /// `None` when the log is not open or unreachable
    pub queue: Option<QueueStats>,
    pub cached_tables: usize,
    pub cached_rows: usize,
    /// Running, populated and the log reachable
    pub healthy: bool,
}

/// Errors returned to callers of [`super::SheetSync`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Service not started (state: {0})")]
    NotStarted(ServiceState),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Remote(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_state_display() {
        assert_eq!(format!("{}", ServiceState::Created), "Created");
        assert_eq!(format!("{}", ServiceState::Running), "Running");
        assert_eq!(format!("{}", ServiceState::Stopped), "Stopped");
    }

    #[test]
    fn test_accepts_writes() {
        assert!(ServiceState::Ready.accepts_writes());
        assert!(ServiceState::Running.accepts_writes());
        assert!(!ServiceState::Populating.accepts_writes());
        assert!(!ServiceState::ShuttingDown.accepts_writes());
    }

    #[test]
    fn test_error_classification() {
        assert!(!SyncError::UnknownTable("x".into()).is_transient());
        assert!(!SyncError::NotStarted(ServiceState::Created).is_transient());
        assert!(SyncError::Remote(RemoteError::Unavailable("503".into())).is_transient());

        let err: SyncError = StorageError::Backend("disk full".into()).into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("disk full"));
    }
}
