//! Service lifecycle management: start, run, tick, shutdown.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::resilience::oplog::OperationLog;

use super::worker::{CycleOutcome, Reconciler};
use super::{ServiceState, SheetSync, SyncError};

impl SheetSync {
    /// Start the service.
    ///
    /// Startup flow:
    /// 1. Validate configuration
    /// 2. Open the operation log; records a dead process left `processing`
    ///    go back to `retry`
    /// 3. Populate the cache from the remote store, every table concurrently.
    ///    A table that fails stays uncached and is read through on first access
    /// 4. Raise the startup barrier → `Ready`
    #[tracing::instrument(skip(self), fields(tables = self.config.tables.len()))]
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if self.state() != ServiceState::Created {
            return Err(SyncError::InvalidConfig(format!(
                "start() called in state {}",
                self.state()
            )));
        }
        self.config.validate().map_err(SyncError::InvalidConfig)?;

        let startup_start = Instant::now();
        info!(db_path = %self.config.db_path, "Starting sheet sync service");

        // ========== PHASE 1: Operation log ==========
        self.set_state(ServiceState::OpeningLog);
        let phase_start = Instant::now();
        let log = match OperationLog::open(&self.config.db_path, self.config.max_attempts).await {
            Ok(log) => Arc::new(log),
            Err(e) => {
                self.set_state(ServiceState::Created);
                return Err(e.into());
            }
        };
        // Backlog report only; an error here must not fail start.
        match log.stats().await {
            Ok(backlog) if backlog.outstanding() > 0 || backlog.failed() > 0 => info!(
                outstanding = backlog.outstanding(),
                failed = backlog.failed(),
                "Operation log has records from a previous run"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not count records left by a previous run"),
        }
        crate::metrics::record_startup_phase("open_log", phase_start.elapsed());

        self.reconciler = Some(Arc::new(Reconciler::new(
            log.clone(),
            self.remote.clone(),
            self.refresher.clone(),
            self.config.worker_poll_interval(),
        )));
        self.log = Some(log);

        // ========== PHASE 2: Initial population ==========
        self.set_state(ServiceState::Populating);
        let phase_start = Instant::now();
        let report = self.refresher.populate().await;
        for (table, error) in &report.failed {
            warn!(table = %table, error = %error, "Initial population failed, table will be read through");
        }
        crate::metrics::record_startup_phase("populate", phase_start.elapsed());

        self.populated_tx.send_replace(true);
        self.set_state(ServiceState::Ready);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(elapsed_ms = startup_start.elapsed().as_millis() as u64, "Sheet sync service ready");
        Ok(())
    }

    /// Spawn the reconciliation worker and the periodic refresh.
    ///
    /// Must be called inside a tokio runtime after [`start()`](Self::start).
    pub fn run(&self) -> Result<(), SyncError> {
        let state = self.state();
        let reconciler = match (&self.reconciler, state) {
            (Some(reconciler), ServiceState::Ready) => reconciler.clone(),
            (_, ServiceState::ShuttingDown | ServiceState::Stopped) => return Err(SyncError::ShuttingDown),
            (_, ServiceState::Running) => return Ok(()),
            (_, other) => return Err(SyncError::NotStarted(other)),
        };

        let worker = tokio::spawn(reconciler.run(
            self.shutdown_tx.subscribe(),
            self.populated_tx.subscribe(),
        ));
        let refresher = tokio::spawn(self.refresher.clone().run(
            self.config.refresh_interval(),
            self.config.refresh_error_backoff(),
            self.shutdown_tx.subscribe(),
            self.populated_tx.subscribe(),
        ));

        {
            let mut tasks = self.tasks.lock();
            tasks.push(("worker", worker));
            tasks.push(("refresher", refresher));
        }

        self.set_state(ServiceState::Running);
        info!("Sheet sync service running");
        Ok(())
    }

    /// Run one reconciliation cycle now (for manual control instead of
    /// [`run()`](Self::run)).
    pub async fn tick(&self) -> Result<CycleOutcome, SyncError> {
        let state = self.state();
        match (&self.reconciler, state) {
            (_, ServiceState::ShuttingDown | ServiceState::Stopped) => Err(SyncError::ShuttingDown),
            (Some(reconciler), _) => Ok(reconciler.run_cycle().await),
            (None, other) => Err(SyncError::NotStarted(other)),
        }
    }

    /// Initiate graceful shutdown.
    ///
    /// Background tasks get `shutdown_grace` to finish their current cycle,
    /// then are aborted. An aborted worker may leave one record
    /// `processing`; it is retried after the next start.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if matches!(self.state(), ServiceState::ShuttingDown | ServiceState::Stopped) {
            return;
        }
        let shutdown_start = Instant::now();
        info!("Initiating sheet sync shutdown...");
        self.set_state(ServiceState::ShuttingDown);
        self.shutdown_tx.send_replace(true);

        let grace = self.config.shutdown_grace();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for (name, mut handle) in tasks {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task ended abnormally"),
                Err(_) => {
                    warn!(task = name, grace_ms = grace.as_millis() as u64, "Background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Some(log) = &self.log {
            log.close().await;
        }

        self.set_state(ServiceState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Sheet sync shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SheetSyncConfig;
    use crate::row::row_from;
    use crate::storage::memory::InMemoryRemote;
    use serde_json::json;
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir) -> SheetSyncConfig {
        SheetSyncConfig {
            tables: vec!["Товары".into()],
            db_path: dir.path().join("q.sqlite3").to_string_lossy().into_owned(),
            worker_poll_interval_ms: 10,
            shutdown_grace_ms: 500,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut sync = SheetSync::new(
            SheetSyncConfig { max_attempts: 0, ..Default::default() },
            Arc::new(InMemoryRemote::default()),
        );
        assert!(matches!(sync.start().await, Err(SyncError::InvalidConfig(_))));
        assert_eq!(sync.state(), ServiceState::Created);
    }

    #[tokio::test]
    async fn test_start_populates_and_raises_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemote::new(["Товары"]));
        remote.seed("Товары", vec![row_from(json!({"product_id": 1}))]);

        let mut sync = SheetSync::new(config(&dir), remote);
        let populated = sync.populated_receiver();
        assert!(!*populated.borrow());

        sync.start().await.unwrap();
        assert_eq!(sync.state(), ServiceState::Ready);
        assert!(*populated.borrow());
        tokio::time::timeout(Duration::from_secs(1), sync.wait_until_populated()).await.unwrap();
        assert_eq!(sync.cache().get_table("Товары").len(), 1);

        // Second start is refused
        assert!(sync.start().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_open_allows_start_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = config(&dir);
        broken.db_path = dir.path().join("missing").join("q.sqlite3").to_string_lossy().into_owned();

        let mut sync = SheetSync::new(broken, Arc::new(InMemoryRemote::new(["Товары"])));
        assert!(matches!(sync.start().await, Err(SyncError::Storage(_))));
        assert_eq!(sync.state(), ServiceState::Created);

        sync.config.db_path = config(&dir).db_path;
        sync.start().await.unwrap();
        assert_eq!(sync.state(), ServiceState::Ready);
    }

    #[tokio::test]
    async fn test_unreadable_backlog_does_not_block_start() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        {
            let log = OperationLog::open(&cfg.db_path, cfg.max_attempts).await.unwrap();
            // A status no current build knows makes the backlog count fail
            sqlx::query(
                "INSERT INTO pending_operations (table_name, kind, status, attempts, created_at) \
                 VALUES ('Товары', 'DELETE', 'archived', 0, 0)",
            )
            .execute(log.pool())
            .await
            .unwrap();
            assert!(log.stats().await.is_err());
            log.close().await;
        }

        let mut sync = SheetSync::new(cfg, Arc::new(InMemoryRemote::new(["Товары"])));
        sync.start().await.unwrap();
        assert_eq!(sync.state(), ServiceState::Ready);
        assert!(*sync.populated_receiver().borrow());
    }

    #[tokio::test]
    async fn test_population_failure_does_not_block_start() {
        let dir = tempfile::tempdir().unwrap();
        // Remote does not have the configured table
        let mut sync = SheetSync::new(config(&dir), Arc::new(InMemoryRemote::new(["Другое"])));
        sync.start().await.unwrap();
        assert_eq!(sync.state(), ServiceState::Ready);
        assert!(!sync.cache().contains("Товары"));
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemote::new(["Товары"]));
        let mut sync = SheetSync::new(config(&dir), remote.clone());

        assert!(matches!(sync.run(), Err(SyncError::NotStarted(ServiceState::Created))));
        sync.start().await.unwrap();
        sync.run().unwrap();
        assert_eq!(sync.state(), ServiceState::Running);
        assert!(sync.health_check().await.healthy);

        sync.enqueue_create("Товары", row_from(json!({"product_id": 5}))).await.unwrap();
        for _ in 0..100 {
            if remote.len("Товары") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(remote.len("Товары"), 1);

        sync.shutdown().await;
        assert_eq!(sync.state(), ServiceState::Stopped);
        assert!(sync.tasks.lock().is_empty());

        let err = sync.enqueue_create("Товары", row_from(json!({"product_id": 6}))).await.unwrap_err();
        assert!(matches!(err, SyncError::ShuttingDown));
        assert!(matches!(sync.tick().await, Err(SyncError::ShuttingDown)));

        // Idempotent
        sync.shutdown().await;
    }
}
