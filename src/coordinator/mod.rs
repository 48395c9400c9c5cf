// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync service coordinator.
//!
//! [`SheetSync`] ties the components together:
//! - the durable operation log every mutation is written to first
//! - the read cache that serves every read and takes optimistic patches
//! - the reconciliation worker delivering the log to the remote store
//! - the periodic full refresh keeping the cache close to remote state
//!
//! # Lifecycle
//!
//! ```text
//! Created → OpeningLog → Populating → Ready → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sheet_sync::{SheetSync, SheetSyncConfig, InMemoryRemote, ServiceState, row_from};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SheetSyncConfig {
//!     tables: vec!["Товары".into()],
//!     ..Default::default()
//! };
//! let remote = Arc::new(InMemoryRemote::new(["Товары"]));
//! let mut sync = SheetSync::new(config, remote);
//! assert_eq!(sync.state(), ServiceState::Created);
//!
//! sync.start().await.expect("start failed");
//! sync.run().expect("run failed");
//!
//! let receipt = sync
//!     .enqueue_create("Товары", row_from(json!({"product_id": 1001, "price": 150.0})))
//!     .await
//!     .expect("enqueue failed");
//! println!("queued as {}", receipt.operation_id);
//!
//! sync.shutdown().await;
//! # }
//! ```

mod types;
mod api;
mod lifecycle;
mod refresh;
pub mod worker;

pub use types::{ServiceState, Enqueued, RefreshReport, HealthCheck, SyncError};
pub use worker::CycleOutcome;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::ReadCache;
use crate::config::SheetSyncConfig;
use crate::resilience::oplog::OperationLog;
use crate::storage::traits::RemoteStore;

use refresh::Refresher;
use worker::Reconciler;

/// Write-behind sync service in front of a remote spreadsheet store.
///
/// # Thread Safety
///
/// After [`start()`](Self::start) every method takes `&self`; share the
/// service behind an `Arc` between request handlers.
pub struct SheetSync {
    pub(super) config: SheetSyncConfig,

    /// Service state (broadcast to watchers)
    pub(super) state: watch::Sender<ServiceState>,
    pub(super) state_rx: watch::Receiver<ServiceState>,

    pub(super) remote: Arc<dyn RemoteStore>,
    pub(super) cache: Arc<ReadCache>,
    pub(super) refresher: Refresher,

    /// Set by `start()`
    pub(super) log: Option<Arc<OperationLog>>,
    pub(super) reconciler: Option<Arc<Reconciler>>,

    /// Raised once by `shutdown()`
    pub(super) shutdown_tx: watch::Sender<bool>,
    /// Raised once initial population finished
    pub(super) populated_tx: watch::Sender<bool>,

    /// Background tasks spawned by `run()`
    pub(super) tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl SheetSync {
    /// Create a new service.
    ///
    /// Starts in `Created` state. Call [`start()`](Self::start) to open the
    /// operation log and populate the cache.
    pub fn new(config: SheetSyncConfig, remote: Arc<dyn RemoteStore>) -> Self {
        let (state_tx, state_rx) = watch::channel(ServiceState::Created);
        let (shutdown_tx, _) = watch::channel(false);
        let (populated_tx, _) = watch::channel(false);

        let cache = Arc::new(ReadCache::new());
        let refresher = Refresher::new(remote.clone(), cache.clone(), &config.tables);

        Self {
            config,
            state: state_tx,
            state_rx,
            remote,
            cache,
            refresher,
            log: None,
            reconciler: None,
            shutdown_tx,
            populated_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get current service state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    /// Check if the service accepts mutations.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().accepts_writes()
    }

    #[must_use]
    pub fn config(&self) -> &SheetSyncConfig {
        &self.config
    }

    /// Direct access to the read cache.
    #[must_use]
    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// The remote store adapter this service writes to.
    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Perform a health check.
    ///
    /// Pings the operation log with `SELECT 1` and reads queue counts;
    /// everything else is cached state.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let populated = *self.populated_tx.borrow();
        let (cached_tables, cached_rows) = self.cache.stats();

        let (log_reachable, queue) = match &self.log {
            Some(log) if log.ping().await => (true, log.stats().await.ok()),
            _ => (false, None),
        };

        HealthCheck {
            state,
            ready: state.accepts_writes(),
            populated,
            log_reachable,
            queue,
            cached_tables,
            cached_rows,
            healthy: matches!(state, ServiceState::Running) && populated && log_reachable,
        }
    }

    pub(super) fn set_state(&self, state: ServiceState) {
        let _ = self.state.send(state);
        crate::metrics::set_service_state(&state.to_string());
    }

    /// The open operation log, or the reason there is none.
    pub(super) fn open_log(&self) -> Result<&Arc<OperationLog>, SyncError> {
        match (&self.log, self.state()) {
            (_, ServiceState::ShuttingDown | ServiceState::Stopped) => Err(SyncError::ShuttingDown),
            (Some(log), _) => Ok(log),
            (None, state) => Err(SyncError::NotStarted(state)),
        }
    }
}

/// Resolves once the flag is `true` or its sender is gone.
pub(crate) async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
