use async_trait::async_trait;
use thiserror::Error;

use crate::row::{Row, RowFilter};

/// Errors from the local operation log.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Operation {0} not found")]
    NotFound(i64),
    #[error("Operation log backend error: {0}")]
    Backend(String),
    #[error("Corrupt operation record: {0}")]
    Corrupt(String),
    /// A claimed record could not be decoded and was parked as
    /// `failed_worker_error`.
    #[error("Operation {0} could not be decoded and was parked: {1}")]
    Quarantined(i64, String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Errors raised by a remote store adapter.
///
/// The reconciliation worker retries every variant the same way; the
/// distinction only shows up in logs and stored error messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),
    #[error("Remote table '{0}' not found")]
    UnknownTable(String),
}

/// The remote tabular store (a spreadsheet behind an HTTP API).
///
/// Implementations own the wire protocol, authentication and the mapping of
/// logical table names to physical sheets. Calls may be slow; the core never
/// makes them while holding the cache lock.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read every row of a table.
    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError>;

    /// Append one row, returning it as the remote stored it.
    async fn create(&self, table: &str, payload: &Row) -> Result<Row, RemoteError>;

    /// Merge `payload` into every row matching `filter`. Returns rows affected.
    async fn update(&self, table: &str, filter: &RowFilter, payload: &Row) -> Result<u64, RemoteError>;

    /// Remove every row matching `filter`. Returns rows affected.
    async fn delete(&self, table: &str, filter: &RowFilter) -> Result<u64, RemoteError>;
}
