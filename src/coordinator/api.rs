//! Request-path API: mutations, reads and operator actions.
//!
//! - `enqueue_create()` / `enqueue_update()` / `enqueue_delete()` / `enqueue()` -
//!   durable write-behind mutations with an optimistic cache patch
//! - `get_table()` / `query()` - cache reads with read-through on first access
//! - `force_refresh()` - on-demand refresh of one table or all of them
//! - `queue_stats()` / `failed_operations()` / `requeue()` - queue inspection

use tracing::{debug, info};

use crate::operation::{Mutation, OperationId, OperationStatus, PendingOperation};
use crate::query::TableQuery;
use crate::resilience::oplog::QueueStats;
use crate::resilience::retry::RetryConfig;
use crate::row::{Row, RowFilter};

use super::flag_raised;
use super::{Enqueued, RefreshReport, ServiceState, SheetSync, SyncError};

impl SheetSync {
    // ═══════════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Queue a new row for `table`.
    ///
    /// The row is appended to the cached table before this returns;
    /// [`Enqueued::provisional`] echoes it back. The remote write happens
    /// later on the reconciliation worker.
    pub async fn enqueue_create(&self, table: &str, payload: Row) -> Result<Enqueued, SyncError> {
        self.enqueue(table, Mutation::Create { payload }).await
    }

    /// Queue a merge of `payload` into every row matching `filter`.
    pub async fn enqueue_update(
        &self,
        table: &str,
        filter: RowFilter,
        payload: Row,
    ) -> Result<Enqueued, SyncError> {
        self.enqueue(table, Mutation::Update { filter, payload }).await
    }

    /// Queue removal of every row matching `filter`.
    pub async fn enqueue_delete(&self, table: &str, filter: RowFilter) -> Result<Enqueued, SyncError> {
        self.enqueue(table, Mutation::Delete { filter }).await
    }

    /// Queue any mutation.
    ///
    /// Order: validate → write to the operation log → patch the cache. A
    /// log failure returns [`SyncError::Storage`] and leaves the cache
    /// untouched.
    ///
    /// The log write and the patch run under the refresher's write gate,
    /// so concurrent enqueues patch in log order and no refresh can land
    /// in between and be patched a second time.
    #[tracing::instrument(skip(self, mutation), fields(table = %table, kind = %mutation.kind()))]
    pub async fn enqueue(&self, table: &str, mutation: Mutation) -> Result<Enqueued, SyncError> {
        let state = self.state();
        if !state.accepts_writes() {
            return Err(match state {
                ServiceState::ShuttingDown | ServiceState::Stopped => SyncError::ShuttingDown,
                other => SyncError::NotStarted(other),
            });
        }
        if !self.config.knows_table(table) {
            return Err(SyncError::UnknownTable(table.to_string()));
        }
        mutation.validate().map_err(SyncError::InvalidOperation)?;

        let log = self.open_log()?;
        let (operation_id, rows_patched) = {
            let _gate = self.refresher.write_gate().lock().await;
            let operation_id = log.enqueue(table, &mutation).await?;
            (operation_id, self.cache.patch_optimistic(table, &mutation))
        };
        crate::metrics::record_optimistic_patch(mutation.kind(), rows_patched);
        debug!(op_id = operation_id, rows_patched, "Mutation accepted");

        let provisional = match mutation {
            Mutation::Create { payload } => Some(payload),
            Mutation::Update { .. } | Mutation::Delete { .. } => None,
        };

        Ok(Enqueued {
            operation_id,
            provisional,
            rows_patched,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Copy of every cached row of `table`.
    ///
    /// A table with no cache entry yet (initial fetch failed) is fetched
    /// from the remote store on the caller's task first.
    pub async fn get_table(&self, table: &str) -> Result<Vec<Row>, SyncError> {
        self.ensure_cached(table).await?;
        Ok(self.cache.get_table(table))
    }

    /// Filter, sort and paginate `table` from the cache.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use sheet_sync::{SheetSync, TableQuery, SortKey, RowFilter};
    /// # async fn example(sync: &SheetSync) {
    /// let orders = sync
    ///     .query("Заказы", &TableQuery::new()
    ///         .filter(RowFilter::new().eq("user_id", 42))
    ///         .sort_by(SortKey::desc("created_at"))
    ///         .limit(10))
    ///     .await
    ///     .unwrap();
    /// # }
    /// ```
    pub async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Row>, SyncError> {
        self.ensure_cached(table).await?;
        Ok(self.cache.query(table, query))
    }

    /// Refresh one table (`Some`) or every configured table (`None`) now.
    ///
    /// A single-table refresh fails with the remote error; a full refresh
    /// reports per-table results and never fails as a whole.
    pub async fn force_refresh(&self, table: Option<&str>) -> Result<RefreshReport, SyncError> {
        match table {
            Some(table) => {
                if !self.config.knows_table(table) {
                    return Err(SyncError::UnknownTable(table.to_string()));
                }
                let rows = self.refresher.refresh_table(table).await?;
                info!(table = %table, rows, "Table force-refreshed");
                Ok(RefreshReport {
                    refreshed: vec![(table.to_string(), rows)],
                    failed: Vec::new(),
                })
            }
            None => {
                let report = self.refresher.refresh_all(&RetryConfig::once()).await;
                info!(
                    refreshed = report.refreshed.len(),
                    failed = report.failed.len(),
                    "All tables force-refreshed"
                );
                Ok(report)
            }
        }
    }

    /// Resolves once initial population finished (or the service is gone).
    pub async fn wait_until_populated(&self) {
        let mut rx = self.populated_tx.subscribe();
        flag_raised(&mut rx).await;
    }

    /// Watch the startup barrier.
    #[must_use]
    pub fn populated_receiver(&self) -> tokio::sync::watch::Receiver<bool> {
        self.populated_tx.subscribe()
    }

    async fn ensure_cached(&self, table: &str) -> Result<(), SyncError> {
        if !self.config.knows_table(table) {
            return Err(SyncError::UnknownTable(table.to_string()));
        }
        if !self.cache.contains(table) {
            crate::metrics::record_read_through(table);
            debug!(table = %table, "Cache miss, reading through");
            self.refresher.refresh_table(table).await?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Queue inspection
    // ═══════════════════════════════════════════════════════════════════════════

    /// Per-status record counts.
    pub async fn queue_stats(&self) -> Result<QueueStats, SyncError> {
        Ok(self.open_log()?.stats().await?)
    }

    /// Parked records of both failed statuses, oldest first.
    pub async fn failed_operations(&self, limit: usize) -> Result<Vec<PendingOperation>, SyncError> {
        let log = self.open_log()?;
        let mut failed = log.list_by_status(OperationStatus::FailedMaxAttempts, limit).await?;
        failed.extend(log.list_by_status(OperationStatus::FailedWorkerError, limit).await?);
        failed.sort_by_key(|op| (op.created_at, op.id));
        failed.truncate(limit);
        Ok(failed)
    }

    /// Put a parked record back in the queue with fresh attempts.
    ///
    /// Returns `false` if the record does not exist or is not parked.
    pub async fn requeue(&self, id: OperationId) -> Result<bool, SyncError> {
        Ok(self.open_log()?.requeue(id).await?)
    }
}
