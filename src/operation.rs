// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued mutations and their lifecycle.
//!
//! A [`Mutation`] is what the application asks for; a [`PendingOperation`]
//! is the durable record of it inside the operation log.
//!
//! # Status lifecycle
//!
//! ```text
//! Pending ──claim──► Processing ──success──► (deleted)
//!                        │
//!                        ├──failure, attempts < max──► Retry ──claim──► Processing …
//!                        ├──failure, attempts ≥ max──► FailedMaxAttempts
//!                        └──bookkeeping error────────► FailedWorkerError
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::row::{Row, RowFilter};
use crate::storage::traits::StorageError;

/// Primary key of a record in the operation log.
pub type OperationId = i64;

/// Kind of remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(StorageError::Corrupt(format!("unknown operation kind '{}'", other))),
        }
    }
}

/// Status of a record in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Enqueued, never attempted
    Pending,
    /// Claimed by a worker, remote call in flight
    Processing,
    /// Failed at least once, eligible for another claim
    Retry,
    /// Remote store kept failing; needs an operator
    FailedMaxAttempts,
    /// Local bookkeeping failed; needs an operator
    FailedWorkerError,
}

impl OperationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retry => "retry",
            Self::FailedMaxAttempts => "failed_max_attempts",
            Self::FailedWorkerError => "failed_worker_error",
        }
    }

    /// Whether `claim_next` may pick a record in this status.
    #[must_use]
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retry)
    }

    /// Whether the record is parked until an operator intervenes.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FailedMaxAttempts | Self::FailedWorkerError)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "retry" => Ok(Self::Retry),
            "failed_max_attempts" => Ok(Self::FailedMaxAttempts),
            "failed_worker_error" => Ok(Self::FailedWorkerError),
            other => Err(StorageError::Corrupt(format!("unknown operation status '{}'", other))),
        }
    }
}

/// A requested change to one remote table.
///
/// Each variant carries exactly the parts its kind needs, so a create
/// without a payload or a delete without a filter cannot be built.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create { payload: Row },
    Update { filter: RowFilter, payload: Row },
    Delete { filter: RowFilter },
}

impl Mutation {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    #[must_use]
    pub fn filter(&self) -> Option<&RowFilter> {
        match self {
            Self::Create { .. } => None,
            Self::Update { filter, .. } | Self::Delete { filter } => Some(filter),
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<&Row> {
        match self {
            Self::Create { payload } | Self::Update { payload, .. } => Some(payload),
            Self::Delete { .. } => None,
        }
    }

    /// Reject shapes the remote store could never execute.
    ///
    /// Empty payloads and empty filters are refused: an empty UPDATE/DELETE
    /// filter would hit every row of the sheet.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(payload) = self.payload() {
            if payload.is_empty() {
                return Err(format!("{} requires a non-empty payload", self.kind()));
            }
        }
        if let Some(filter) = self.filter() {
            if filter.is_empty() {
                return Err(format!("{} requires a non-empty filter", self.kind()));
            }
        }
        Ok(())
    }

    /// Rebuild a mutation from its stored parts.
    pub fn from_parts(
        kind: OperationKind,
        filter: Option<RowFilter>,
        payload: Option<Row>,
    ) -> Result<Self, StorageError> {
        match (kind, filter, payload) {
            (OperationKind::Create, _, Some(payload)) => Ok(Self::Create { payload }),
            (OperationKind::Update, Some(filter), Some(payload)) => Ok(Self::Update { filter, payload }),
            (OperationKind::Delete, Some(filter), _) => Ok(Self::Delete { filter }),
            (kind, filter, payload) => Err(StorageError::Corrupt(format!(
                "{} stored with filter={} payload={}",
                kind,
                filter.is_some(),
                payload.is_some()
            ))),
        }
    }
}

/// Durable record of one queued mutation.
///
/// Filter and payload stay as the raw JSON text the log stored; the
/// worker decodes them with [`decode`](Self::decode) right before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: OperationId,
    pub table: String,
    pub kind: OperationKind,
    pub filter_json: Option<String>,
    pub payload_json: Option<String>,
    pub status: OperationStatus,
    pub attempts: u32,
    /// Epoch millis
    pub created_at: i64,
    /// Epoch millis of the latest claim
    pub last_attempt_at: Option<i64>,
    pub error_message: Option<String>,
}

impl PendingOperation {
    /// Decode the stored filter/payload back into a [`Mutation`].
    pub fn decode(&self) -> Result<Mutation, StorageError> {
        let filter = self
            .filter_json
            .as_deref()
            .map(serde_json::from_str::<RowFilter>)
            .transpose()
            .map_err(|e| StorageError::Corrupt(format!("operation {} filter: {}", self.id, e)))?;
        let payload = self
            .payload_json
            .as_deref()
            .map(serde_json::from_str::<Row>)
            .transpose()
            .map_err(|e| StorageError::Corrupt(format!("operation {} payload: {}", self.id, e)))?;
        Mutation::from_parts(self.kind, filter, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::row_from;
    use serde_json::json;

    fn record(kind: OperationKind, filter: Option<&str>, payload: Option<&str>) -> PendingOperation {
        PendingOperation {
            id: 1,
            table: "Товары".into(),
            kind,
            filter_json: filter.map(String::from),
            payload_json: payload.map(String::from),
            status: OperationStatus::Processing,
            attempts: 1,
            created_at: 0,
            last_attempt_at: None,
            error_message: None,
        }
    }

    #[test]
    fn test_kind_and_status_round_trip_strings() {
        for kind in [OperationKind::Create, OperationKind::Update, OperationKind::Delete] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        for status in [
            OperationStatus::Pending,
            OperationStatus::Processing,
            OperationStatus::Retry,
            OperationStatus::FailedMaxAttempts,
            OperationStatus::FailedWorkerError,
        ] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = "UPSERT".parse::<OperationKind>().unwrap_err();
        assert!(err.to_string().contains("UPSERT"));
        assert!("create".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(OperationStatus::Pending.is_claimable());
        assert!(OperationStatus::Retry.is_claimable());
        assert!(!OperationStatus::Processing.is_claimable());
        assert!(OperationStatus::FailedMaxAttempts.is_terminal());
        assert!(OperationStatus::FailedWorkerError.is_terminal());
        assert!(!OperationStatus::Retry.is_terminal());
    }

    #[test]
    fn test_validate_rejects_empty_parts() {
        let empty_create = Mutation::Create { payload: Row::new() };
        assert!(empty_create.validate().is_err());

        let empty_delete = Mutation::Delete { filter: RowFilter::new() };
        assert!(empty_delete.validate().unwrap_err().contains("filter"));

        let ok = Mutation::Update {
            filter: RowFilter::new().eq("id", 1),
            payload: row_from(json!({"status": "done"})),
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_decode_update() {
        let op = record(OperationKind::Update, Some(r#"{"id":1}"#), Some(r#"{"status":"x"}"#));
        let mutation = op.decode().unwrap();
        assert_eq!(mutation.kind(), OperationKind::Update);
        assert_eq!(mutation.filter().unwrap(), &RowFilter::new().eq("id", 1));
        assert_eq!(mutation.payload().unwrap()["status"], json!("x"));
    }

    #[test]
    fn test_decode_missing_filter_is_corrupt() {
        let op = record(OperationKind::Delete, None, None);
        assert!(matches!(op.decode(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_decode_bad_json_is_corrupt() {
        let op = record(OperationKind::Create, None, Some("{not json"));
        let err = op.decode().unwrap_err();
        assert!(err.to_string().contains("payload"));
    }
}
