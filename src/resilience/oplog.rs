// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable operation log backed by SQLite.
//!
//! Every mutation accepted by the service is written here before the caller
//! sees success. The reconciliation worker claims records oldest-first,
//! executes them against the remote store and deletes them only after the
//! remote write is confirmed. A record that keeps failing is parked in a
//! terminal `failed_*` status for an operator to inspect or requeue.
//!
//! The database runs in WAL journal mode with `synchronous = FULL`: an
//! enqueue that returned `Ok` survives a process crash or power loss.
//!
//! Records found in `processing` when the log is opened belonged to a worker
//! that died mid-flight. They are moved back to `retry`, which makes remote
//! delivery at-least-once.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row as _;
use tracing::{debug, error, info, warn};

use crate::operation::{Mutation, OperationId, OperationKind, OperationStatus, PendingOperation};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::StorageError;

/// Stored error messages are cut to this many characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_operations (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name      TEXT    NOT NULL,
    kind            TEXT    NOT NULL,
    filter_json     TEXT,
    payload_json    TEXT,
    status          TEXT    NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL,
    last_attempt_at INTEGER,
    error_message   TEXT
)
"#;

const INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_pending_operations_status_created \
                     ON pending_operations (status, created_at)";

const COLUMNS: &str = "id, table_name, kind, filter_json, payload_json, status, attempts, \
                       created_at, last_attempt_at, error_message";

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub retry: u64,
    pub failed_max_attempts: u64,
    pub failed_worker_error: u64,
}

impl QueueStats {
    /// Records the worker will still try to deliver.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing + self.retry
    }

    /// Records parked in a terminal failed status.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed_max_attempts + self.failed_worker_error
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.outstanding() + self.failed()
    }

    fn slot(&mut self, status: OperationStatus) -> &mut u64 {
        match status {
            OperationStatus::Pending => &mut self.pending,
            OperationStatus::Processing => &mut self.processing,
            OperationStatus::Retry => &mut self.retry,
            OperationStatus::FailedMaxAttempts => &mut self.failed_max_attempts,
            OperationStatus::FailedWorkerError => &mut self.failed_worker_error,
        }
    }
}

/// SQLite-backed queue of mutations awaiting remote delivery.
pub struct OperationLog {
    pool: SqlitePool,
    path: String,
    max_attempts: u32,
}

impl OperationLog {
    /// Open (creating if needed) the log at `path` and recover records a
    /// previous process left in flight.
    pub async fn open(path: impl AsRef<Path>, max_attempts: u32) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, max_attempts, "Opening operation log");

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = retry("oplog_connect", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(StorageError::from)
            }
        })
        .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query(INDEX).execute(&pool).await?;

        let log = Self {
            pool,
            path: path_str,
            max_attempts: max_attempts.max(1),
        };
        log.recover_in_flight().await?;
        Ok(log)
    }

    /// Move every `processing` record back to `retry`.
    ///
    /// Returns how many records were recovered.
    pub async fn recover_in_flight(&self) -> Result<u64, StorageError> {
        let recovered = sqlx::query("UPDATE pending_operations SET status = ? WHERE status = ?")
            .bind(OperationStatus::Retry.as_str())
            .bind(OperationStatus::Processing.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if recovered > 0 {
            warn!(recovered, "Recovered operations left in flight by a previous run");
            crate::metrics::record_recovered(recovered);
        }
        Ok(recovered)
    }

    /// Durably record a mutation as `pending`.
    #[tracing::instrument(skip(self, mutation), fields(table = %table, kind = %mutation.kind()))]
    pub async fn enqueue(&self, table: &str, mutation: &Mutation) -> Result<OperationId, StorageError> {
        let filter_json = mutation
            .filter()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Backend(format!("filter serialization failed: {}", e)))?;
        let payload_json = mutation
            .payload()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Backend(format!("payload serialization failed: {}", e)))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pending_operations \
             (table_name, kind, filter_json, payload_json, status, attempts, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?) RETURNING id",
        )
        .bind(table)
        .bind(mutation.kind().as_str())
        .bind(filter_json)
        .bind(payload_json)
        .bind(OperationStatus::Pending.as_str())
        .bind(crate::now_millis())
        .fetch_one(&self.pool)
        .await?;

        crate::metrics::record_enqueued(table, mutation.kind());
        debug!(op_id = id, "Operation queued");
        Ok(id)
    }

    /// Atomically claim the oldest `pending`/`retry` record.
    ///
    /// The claimed record is `processing`, its attempt counter incremented
    /// and `last_attempt_at` stamped. Two concurrent claimants never receive
    /// the same record.
    ///
    /// A claimed record that cannot be decoded is moved to
    /// `failed_worker_error` in the same transaction and reported as
    /// [`StorageError::Quarantined`], so it never stays in `processing`.
    pub async fn claim_next(&self) -> Result<Option<PendingOperation>, StorageError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE pending_operations \
             SET status = ?, attempts = attempts + 1, last_attempt_at = ? \
             WHERE id = ( \
                 SELECT id FROM pending_operations \
                 WHERE status IN (?, ?) \
                 ORDER BY created_at, id LIMIT 1 \
             ) \
             RETURNING {}",
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(OperationStatus::Processing.as_str())
            .bind(crate::now_millis())
            .bind(OperationStatus::Pending.as_str())
            .bind(OperationStatus::Retry.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let row = match row {
            Some(row) => row,
            None => {
                tx.commit().await?;
                return Ok(None);
            }
        };

        let op = match decode_row(&row) {
            Ok(op) => op,
            Err(e) => {
                let id: OperationId = row.try_get("id")?;
                let message = format!("undecodable record: {}", e);
                sqlx::query("UPDATE pending_operations SET status = ?, error_message = ? WHERE id = ?")
                    .bind(OperationStatus::FailedWorkerError.as_str())
                    .bind(truncate_message(&message))
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;

                error!(op_id = id, error = %e, "Claimed record could not be decoded, parked");
                crate::metrics::record_parked(OperationStatus::FailedWorkerError.as_str());
                return Err(StorageError::Quarantined(id, message));
            }
        };
        tx.commit().await?;

        crate::metrics::record_claimed(op.kind, op.attempts);
        debug!(op_id = op.id, table = %op.table, kind = %op.kind, attempt = op.attempts, "Operation claimed");
        Ok(Some(op))
    }

    /// Delete a delivered record. Returns `false` if it was already gone.
    pub async fn complete(&self, id: OperationId) -> Result<bool, StorageError> {
        let deleted = sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Record a failed delivery attempt.
    ///
    /// The record goes back to `retry`, or to `failed_max_attempts` once its
    /// attempt counter has reached the configured bound.
    pub async fn reschedule(&self, id: OperationId, message: &str) -> Result<OperationStatus, StorageError> {
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE pending_operations \
             SET status = CASE WHEN attempts >= ? THEN ? ELSE ? END, error_message = ? \
             WHERE id = ? RETURNING status",
        )
        .bind(i64::from(self.max_attempts))
        .bind(OperationStatus::FailedMaxAttempts.as_str())
        .bind(OperationStatus::Retry.as_str())
        .bind(truncate_message(message))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let status: OperationStatus = status.ok_or(StorageError::NotFound(id))?.parse()?;
        if status.is_terminal() {
            crate::metrics::record_parked(status.as_str());
        }
        Ok(status)
    }

    /// Park a record whose failure was not the remote store's fault.
    pub async fn mark_worker_error(&self, id: OperationId, message: &str) -> Result<(), StorageError> {
        let updated = sqlx::query(
            "UPDATE pending_operations SET status = ?, error_message = ? WHERE id = ?",
        )
        .bind(OperationStatus::FailedWorkerError.as_str())
        .bind(truncate_message(message))
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StorageError::NotFound(id));
        }
        crate::metrics::record_parked(OperationStatus::FailedWorkerError.as_str());
        Ok(())
    }

    pub async fn get(&self, id: OperationId) -> Result<Option<PendingOperation>, StorageError> {
        let sql = format!("SELECT {} FROM pending_operations WHERE id = ?", COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| decode_row(&r)).transpose()
    }

    /// Records in `status`, oldest first.
    pub async fn list_by_status(
        &self,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<PendingOperation>, StorageError> {
        let sql = format!(
            "SELECT {} FROM pending_operations WHERE status = ? ORDER BY created_at, id LIMIT ?",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    /// Per-status record counts. Also publishes the queue depth gauges.
    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM pending_operations GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("n")?;
            *stats.slot(status.parse()?) = count.max(0) as u64;
        }

        for (status, count) in [
            (OperationStatus::Pending, stats.pending),
            (OperationStatus::Processing, stats.processing),
            (OperationStatus::Retry, stats.retry),
            (OperationStatus::FailedMaxAttempts, stats.failed_max_attempts),
            (OperationStatus::FailedWorkerError, stats.failed_worker_error),
        ] {
            crate::metrics::set_queue_depth(status.as_str(), count);
        }
        Ok(stats)
    }

    /// Give a parked record a fresh set of attempts.
    ///
    /// Only `failed_*` records are eligible. Returns `false` otherwise.
    pub async fn requeue(&self, id: OperationId) -> Result<bool, StorageError> {
        let updated = sqlx::query(
            "UPDATE pending_operations \
             SET status = ?, attempts = 0, error_message = NULL \
             WHERE id = ? AND status IN (?, ?)",
        )
        .bind(OperationStatus::Retry.as_str())
        .bind(id)
        .bind(OperationStatus::FailedMaxAttempts.as_str())
        .bind(OperationStatus::FailedWorkerError.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated > 0 {
            info!(op_id = id, "Failed operation requeued");
            crate::metrics::record_requeued();
        }
        Ok(updated > 0)
    }

    /// Liveness check used by `health_check`.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool. Further calls fail with a backend error.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!(path = %self.path, "Operation log closed");
    }
}

fn decode_row(row: &SqliteRow) -> Result<PendingOperation, StorageError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let attempts: i64 = row.try_get("attempts")?;

    Ok(PendingOperation {
        id: row.try_get("id")?,
        table: row.try_get("table_name")?,
        kind: kind.parse::<OperationKind>()?,
        filter_json: row.try_get("filter_json")?,
        payload_json: row.try_get("payload_json")?,
        status: status.parse()?,
        attempts: u32::try_from(attempts)
            .map_err(|_| StorageError::Corrupt(format!("attempts out of range: {}", attempts)))?,
        created_at: row.try_get("created_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
