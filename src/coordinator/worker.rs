// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation worker: drains the operation log into the remote store.
//!
//! # Cycle
//!
//! ```text
//! claim ──none──► Idle
//!   │  └──undecodable──► WorkerError (parked in the claim transaction)
//!   │
//!   ▼
//! decode ──corrupt──► WorkerError (parked)
//!   │
//!   ▼
//! remote call ──ok──► complete ──► refresh table ──► Succeeded
//!   │
//!   └──error / 0 rows──► reschedule ──► Rescheduled | Failed (parked)
//! ```
//!
//! Cycles are single-flight: the background loop and manual
//! [`tick`](super::SheetSync::tick) calls never run one concurrently, so
//! records are delivered strictly in creation order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::metrics::RemoteTimer;
use crate::operation::{Mutation, OperationId, PendingOperation};
use crate::resilience::oplog::OperationLog;
use crate::storage::traits::{RemoteStore, StorageError};

use super::flag_raised;
use super::refresh::Refresher;

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to claim
    Idle,
    /// Remote write confirmed, record deleted
    Succeeded(OperationId),
    /// Remote write failed, record back in `retry`
    Rescheduled(OperationId),
    /// Remote write failed on the last allowed attempt, record parked
    Failed(OperationId),
    /// Local failure around the remote call, record parked
    WorkerError(OperationId),
    /// The operation log itself could not be read
    LogUnavailable,
}

impl CycleOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Succeeded(_) => "succeeded",
            Self::Rescheduled(_) => "rescheduled",
            Self::Failed(_) => "failed",
            Self::WorkerError(_) => "worker_error",
            Self::LogUnavailable => "log_unavailable",
        }
    }

    /// Only a success lets the next cycle start without a pause.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Executes queued operations against the remote store.
pub(crate) struct Reconciler {
    log: Arc<OperationLog>,
    remote: Arc<dyn RemoteStore>,
    refresher: Refresher,
    poll_interval: Duration,
    single_flight: Mutex<()>,
}

impl Reconciler {
    pub(crate) fn new(
        log: Arc<OperationLog>,
        remote: Arc<dyn RemoteStore>,
        refresher: Refresher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            log,
            remote,
            refresher,
            poll_interval,
            single_flight: Mutex::new(()),
        }
    }

    /// Background loop: waits for the startup barrier, then runs cycles
    /// until shutdown. An in-flight cycle always finishes before exit.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        mut populated_rx: watch::Receiver<bool>,
    ) {
        tokio::select! {
            _ = flag_raised(&mut populated_rx) => {}
            _ = flag_raised(&mut shutdown_rx) => return,
        }
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Reconciliation worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if self.run_cycle().await.is_success() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = flag_raised(&mut shutdown_rx) => break,
            }
        }
        info!("Reconciliation worker stopped");
    }

    /// Claim and execute at most one operation.
    pub(crate) async fn run_cycle(&self) -> CycleOutcome {
        let _guard = self.single_flight.lock().await;
        let outcome = self.cycle().await;
        crate::metrics::record_cycle(outcome.as_str());
        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        let op = match self.log.claim_next().await {
            Ok(Some(op)) => op,
            Ok(None) => return CycleOutcome::Idle,
            Err(StorageError::Quarantined(id, reason)) => {
                error!(op_id = id, error = %reason, "Claimed operation parked as undecodable");
                return CycleOutcome::WorkerError(id);
            }
            Err(e) => {
                error!(error = %e, "Failed to claim next operation");
                return CycleOutcome::LogUnavailable;
            }
        };

        let mutation = match op.decode() {
            Ok(mutation) => mutation,
            Err(e) => return self.park(&op, &e.to_string()).await,
        };

        match self.execute(&op.table, &mutation).await {
            Ok(affected) => {
                if let Err(e) = self.log.complete(op.id).await {
                    return self
                        .park(&op, &format!("remote write succeeded but completion failed: {}", e))
                        .await;
                }
                info!(op_id = op.id, table = %op.table, kind = %op.kind, affected, attempt = op.attempts, "Operation delivered");

                if let Err(e) = self.refresher.refresh_table(&op.table).await {
                    warn!(op_id = op.id, table = %op.table, error = %e, "Post-write refresh failed, cache stays optimistic");
                }
                CycleOutcome::Succeeded(op.id)
            }
            Err(message) => match self.log.reschedule(op.id, &message).await {
                Ok(status) if status.is_terminal() => {
                    error!(
                        op_id = op.id,
                        table = %op.table,
                        kind = %op.kind,
                        attempts = op.attempts,
                        error = %message,
                        "Operation failed permanently"
                    );
                    CycleOutcome::Failed(op.id)
                }
                Ok(_) => {
                    warn!(
                        op_id = op.id,
                        table = %op.table,
                        kind = %op.kind,
                        attempt = op.attempts,
                        error = %message,
                        "Operation failed, will retry"
                    );
                    CycleOutcome::Rescheduled(op.id)
                }
                Err(e) => self.park(&op, &format!("reschedule failed: {} (remote: {})", e, message)).await,
            },
        }
    }

    /// One remote call. Zero affected rows counts as a failure.
    async fn execute(&self, table: &str, mutation: &Mutation) -> Result<u64, String> {
        let operation = match mutation {
            Mutation::Create { .. } => "create",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        };

        let result = {
            let _timer = RemoteTimer::new(operation);
            match mutation {
                Mutation::Create { payload } => self.remote.create(table, payload).await.map(|_| 1),
                Mutation::Update { filter, payload } => self.remote.update(table, filter, payload).await,
                Mutation::Delete { filter } => self.remote.delete(table, filter).await,
            }
        };

        match result {
            Ok(0) => {
                crate::metrics::record_remote_call(operation, "no_match");
                Err(format!("{} on '{}' matched no rows", mutation.kind(), table))
            }
            Ok(affected) => {
                crate::metrics::record_remote_call(operation, "success");
                Ok(affected)
            }
            Err(e) => {
                crate::metrics::record_remote_call(operation, "failure");
                Err(e.to_string())
            }
        }
    }

    async fn park(&self, op: &PendingOperation, message: &str) -> CycleOutcome {
        error!(op_id = op.id, table = %op.table, error = %message, "Worker error, parking operation");
        if let Err(e) = self.log.mark_worker_error(op.id, message).await {
            // Stays `processing`; recovered to `retry` on the next open
            error!(op_id = op.id, error = %e, "Failed to park operation");
        } else {
            debug!(op_id = op.id, "Operation parked as worker error");
        }
        CycleOutcome::WorkerError(op.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ReadCache;
    use crate::operation::OperationStatus;
    use crate::row::{row_from, RowFilter};
    use crate::storage::memory::InMemoryRemote;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        log: Arc<OperationLog>,
        remote: Arc<InMemoryRemote>,
        cache: Arc<ReadCache>,
        worker: Arc<Reconciler>,
    }

    async fn fixture(max_attempts: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(OperationLog::open(dir.path().join("q.sqlite3"), max_attempts).await.unwrap());
        let remote = Arc::new(InMemoryRemote::new(["Товары"]));
        remote.seed("Товары", vec![row_from(json!({"product_id": 1, "price": 10.0}))]);
        let cache = Arc::new(ReadCache::new());
        let refresher = Refresher::new(remote.clone(), cache.clone(), &["Товары".to_string()]);
        let worker = Arc::new(Reconciler::new(
            log.clone(),
            remote.clone(),
            refresher,
            Duration::from_millis(10),
        ));
        Fixture { _dir: dir, log, remote, cache, worker }
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let f = fixture(5).await;
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Idle);
    }

    #[tokio::test]
    async fn test_create_delivered_and_table_refreshed() {
        let f = fixture(5).await;
        let id = f
            .log
            .enqueue("Товары", &Mutation::Create { payload: row_from(json!({"product_id": 2})) })
            .await
            .unwrap();

        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Succeeded(id));
        assert!(f.log.get(id).await.unwrap().is_none());
        assert_eq!(f.remote.len("Товары"), 2);
        // Post-write refresh pulled remote state
        assert_eq!(f.cache.get_table("Товары").len(), 2);
        assert!(f.cache.last_refreshed("Товары").is_some());
    }

    #[tokio::test]
    async fn test_zero_affected_update_is_retried_then_parked() {
        let f = fixture(2).await;
        let id = f
            .log
            .enqueue(
                "Товары",
                &Mutation::Update {
                    filter: RowFilter::new().eq("product_id", 404),
                    payload: row_from(json!({"price": 1.0})),
                },
            )
            .await
            .unwrap();

        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Rescheduled(id));
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Failed(id));
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Idle);

        let op = f.log.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::FailedMaxAttempts);
        assert!(op.error_message.unwrap().contains("matched no rows"));
    }

    #[tokio::test]
    async fn test_unknown_remote_table_is_rescheduled() {
        let f = fixture(5).await;
        let id = f
            .log
            .enqueue("Исчезнувшая", &Mutation::Delete { filter: RowFilter::new().eq("id", 1) })
            .await
            .unwrap();

        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Rescheduled(id));
        let op = f.log.get(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Retry);
        assert!(op.error_message.unwrap().contains("Исчезнувшая"));
    }

    #[tokio::test]
    async fn test_fifo_across_cycles() {
        let f = fixture(5).await;
        let first = f
            .log
            .enqueue("Товары", &Mutation::Create { payload: row_from(json!({"product_id": 2})) })
            .await
            .unwrap();
        let second = f
            .log
            .enqueue(
                "Товары",
                &Mutation::Update {
                    filter: RowFilter::new().eq("product_id", 2),
                    payload: row_from(json!({"price": 99.0})),
                },
            )
            .await
            .unwrap();

        // The update only matches because the create went first
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Succeeded(first));
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Succeeded(second));
    }

    #[tokio::test]
    async fn test_closed_log_reports_unavailable() {
        let f = fixture(5).await;
        f.log.close().await;
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::LogUnavailable);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_parked_and_queue_continues() {
        let f = fixture(5).await;
        let id = f
            .log
            .enqueue("Товары", &Mutation::Create { payload: row_from(json!({"product_id": 2})) })
            .await
            .unwrap();
        // A kind no decoder accepts
        sqlx::query("UPDATE pending_operations SET kind = 'MERGE' WHERE id = ?")
            .bind(id)
            .execute(f.log.pool())
            .await
            .unwrap();

        assert_eq!(f.worker.run_cycle().await, CycleOutcome::WorkerError(id));
        assert_eq!(f.worker.run_cycle().await, CycleOutcome::Idle);

        let stats = f.log.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.failed_worker_error, 1);
        assert_eq!(f.remote.len("Товары"), 1);
    }

    #[tokio::test]
    async fn test_run_loop_drains_queue_and_stops() {
        let f = fixture(5).await;
        for i in 10..13 {
            f.log
                .enqueue("Товары", &Mutation::Create { payload: row_from(json!({"product_id": i})) })
                .await
                .unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_populated_tx, populated_rx) = watch::channel(true);
        let handle = tokio::spawn(f.worker.clone().run(shutdown_rx, populated_rx));

        for _ in 0..100 {
            if f.log.stats().await.unwrap().total() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.remote.len("Товары"), 4);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
