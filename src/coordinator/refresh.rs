// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table refresh: initial population, on-demand refresh and the periodic
//! full refresh loop.
//!
//! A refresh overwrites the cached table wholesale with what the remote
//! store returns. It races with the reconciliation worker's post-write
//! refresh; whichever finishes last wins, and both reflect remote state.
//!
//! The swap into the cache takes the write gate, which `enqueue` holds
//! across its log insert and optimistic patch. A refresh therefore never
//! lands between the two, and optimistic patches apply in log order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::ReadCache;
use crate::metrics::RemoteTimer;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::traits::{RemoteError, RemoteStore};

use super::flag_raised;
use super::types::RefreshReport;

/// Pulls tables from the remote store into the cache.
#[derive(Clone)]
pub(crate) struct Refresher {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<ReadCache>,
    tables: Arc<[String]>,
    write_gate: Arc<Mutex<()>>,
}

impl Refresher {
    pub(crate) fn new(remote: Arc<dyn RemoteStore>, cache: Arc<ReadCache>, tables: &[String]) -> Self {
        Self {
            remote,
            cache,
            tables: tables.into(),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Serializes cache swaps against enqueue's insert-then-patch.
    pub(crate) fn write_gate(&self) -> &Mutex<()> {
        &self.write_gate
    }

    /// Fetch one table and swap it into the cache. Returns rows loaded.
    pub(crate) async fn refresh_table(&self, table: &str) -> Result<usize, RemoteError> {
        let fetched = {
            let _timer = RemoteTimer::new("fetch_all");
            self.remote.fetch_all(table).await
        };

        match fetched {
            Ok(rows) => {
                let count = rows.len();
                {
                    let _gate = self.write_gate.lock().await;
                    self.cache.replace_table(table, rows);
                }
                crate::metrics::record_remote_call("fetch_all", "success");
                crate::metrics::record_refresh(table, true);
                Ok(count)
            }
            Err(e) => {
                crate::metrics::record_remote_call("fetch_all", "failure");
                crate::metrics::record_refresh(table, false);
                Err(e)
            }
        }
    }

    /// Refresh every configured table concurrently.
    ///
    /// A failing table keeps its previous cached rows; the others proceed.
    pub(crate) async fn refresh_all(&self, policy: &RetryConfig) -> RefreshReport {
        let mut set = JoinSet::new();
        for table in self.tables.iter().cloned() {
            let this = self.clone();
            let policy = policy.clone();
            set.spawn(async move {
                let result = retry("refresh_table", &policy, || this.refresh_table(&table)).await;
                (table, result)
            });
        }

        let mut report = RefreshReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((table, Ok(rows))) => {
                    debug!(table = %table, rows, "Table refreshed");
                    report.refreshed.push((table, rows));
                }
                Ok((table, Err(e))) => {
                    warn!(table = %table, error = %e, "Table refresh failed, keeping stale rows");
                    report.failed.push((table, e.to_string()));
                }
                Err(e) => {
                    error!(error = %e, "Refresh task panicked");
                }
            }
        }

        report.refreshed.sort();
        report.failed.sort();
        let (tables, rows) = self.cache.stats();
        crate::metrics::set_cache_size(tables, rows);
        report
    }

    /// Initial population, with a few retries per table.
    pub(crate) async fn populate(&self) -> RefreshReport {
        let report = self.refresh_all(&RetryConfig::remote_fetch()).await;
        info!(
            loaded = report.refreshed.len(),
            failed = report.failed.len(),
            "Initial cache population finished"
        );
        report
    }

    /// Periodic full refresh until shutdown.
    ///
    /// Waits for the startup barrier first. A cycle in which every table
    /// failed adds `error_backoff` before the next regular interval.
    pub(crate) async fn run(
        self,
        interval: Duration,
        error_backoff: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
        mut populated_rx: watch::Receiver<bool>,
    ) {
        tokio::select! {
            _ = flag_raised(&mut populated_rx) => {}
            _ = flag_raised(&mut shutdown_rx) => return,
        }
        info!(interval_secs = interval.as_secs(), "Periodic refresh started");

        let mut pause = interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = flag_raised(&mut shutdown_rx) => break,
            }

            let report = self.refresh_all(&RetryConfig::once()).await;
            pause = if !self.tables.is_empty() && report.refreshed.is_empty() {
                error!(
                    failed = report.failed.len(),
                    backoff_secs = error_backoff.as_secs(),
                    "Every table failed to refresh, backing off"
                );
                interval + error_backoff
            } else {
                debug!(refreshed = report.refreshed.len(), failed = report.failed.len(), "Periodic refresh done");
                interval
            };
        }
        info!("Periodic refresh stopped");
    }
}
