// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Sheet Sync
//!
//! A write-behind sync layer in front of a slow, rate-limited remote
//! spreadsheet store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Request Path                          │
//! │  • enqueue_create / enqueue_update / enqueue_delete         │
//! │  • get_table / query (never wait on the remote)             │
//! └─────────────────────────────────────────────────────────────┘
//!              │ 1. persist                  │ 2. patch
//!              ▼                             ▼
//! ┌───────────────────────────┐  ┌──────────────────────────────┐
//! │   Operation Log (SQLite)  │  │     Read Cache (in memory)   │
//! │  • crash-safe, FIFO       │  │  • full row set per table    │
//! │  • retry bookkeeping      │  │  • optimistic patches        │
//! └───────────────────────────┘  └──────────────────────────────┘
//!              │                             ▲
//!   (reconciliation worker)        (post-write + periodic refresh)
//!              ▼                             │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Remote Store (spreadsheet API)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sheet_sync::{SheetSync, SheetSyncConfig, InMemoryRemote, RowFilter, TableQuery, row_from};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SheetSyncConfig {
//!         tables: vec!["Товары".into(), "Заказы".into()],
//!         ..Default::default()
//!     };
//!     let remote = Arc::new(InMemoryRemote::new(["Товары", "Заказы"]));
//!
//!     let mut sync = SheetSync::new(config, remote);
//!     sync.start().await.expect("Failed to start");
//!     sync.run().expect("Failed to spawn background tasks");
//!
//!     // Durable, visible immediately, delivered later
//!     sync.enqueue_create("Товары", row_from(json!({"product_id": 1001, "price": 150.0})))
//!         .await
//!         .expect("Failed to enqueue");
//!
//!     let rows = sync
//!         .query("Товары", &TableQuery::new().filter(RowFilter::new().eq("product_id", 1001)))
//!         .await
//!         .unwrap();
//!     assert_eq!(rows.len(), 1);
//!
//!     sync.shutdown().await;
//! }
//! ```
//!
//! ## Guarantees
//!
//! - An enqueue that returned `Ok` survives a crash
//! - Remote writes are delivered at least once, in creation order
//! - A write that keeps failing is parked after `max_attempts`, never dropped
//! - Reads are eventually consistent with the remote store
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`SheetSync`] service and its background tasks
//! - [`cache`]: in-memory read cache
//! - [`resilience`]: SQLite operation log, retry
//! - [`storage`]: remote store contract and adapters
//! - [`operation`], [`row`], [`query`]: data model

pub mod config;
pub mod row;
pub mod query;
pub mod operation;
pub mod storage;
pub mod resilience;
pub mod cache;
pub mod coordinator;
pub mod metrics;

pub use config::SheetSyncConfig;
pub use coordinator::{
    SheetSync, ServiceState, Enqueued, RefreshReport, HealthCheck, SyncError, CycleOutcome,
};
pub use cache::{ReadCache, CachedTable};
pub use operation::{Mutation, OperationId, OperationKind, OperationStatus, PendingOperation};
pub use query::{TableQuery, SortKey, SortOrder};
pub use row::{Row, RowFilter, row_from};
pub use storage::traits::{RemoteStore, RemoteError, StorageError};
pub use storage::memory::InMemoryRemote;
pub use storage::blocking::{BlockingRemoteStore, Offloaded};
pub use resilience::oplog::{OperationLog, QueueStats};
pub use resilience::retry::RetryConfig;

/// Current time as Unix epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
