// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Adapter for synchronous remote clients.
//!
//! Many spreadsheet client libraries are blocking. Wrapping one in
//! [`Offloaded`] runs every call on tokio's blocking thread pool, so a slow
//! HTTP round trip never stalls the async workers serving cache reads and
//! enqueue calls.

use std::sync::Arc;

use async_trait::async_trait;

use crate::row::{Row, RowFilter};
use super::traits::{RemoteError, RemoteStore};

/// Blocking counterpart of [`RemoteStore`].
pub trait BlockingRemoteStore: Send + Sync + 'static {
    fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError>;
    fn create(&self, table: &str, payload: &Row) -> Result<Row, RemoteError>;
    fn update(&self, table: &str, filter: &RowFilter, payload: &Row) -> Result<u64, RemoteError>;
    fn delete(&self, table: &str, filter: &RowFilter) -> Result<u64, RemoteError>;
}

/// Runs a [`BlockingRemoteStore`] on `spawn_blocking`.
pub struct Offloaded<S> {
    inner: Arc<S>,
}

impl<S: BlockingRemoteStore> Offloaded<S> {
    pub fn new(inner: S) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// Borrow the wrapped client.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, RemoteError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || call(inner.as_ref()))
            .await
            .map_err(|e| RemoteError::Unavailable(format!("blocking remote call aborted: {}", e)))?
    }
}

#[async_trait]
impl<S: BlockingRemoteStore> RemoteStore for Offloaded<S> {
    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError> {
        let table = table.to_string();
        self.run(move |s| s.fetch_all(&table)).await
    }

    async fn create(&self, table: &str, payload: &Row) -> Result<Row, RemoteError> {
        let (table, payload) = (table.to_string(), payload.clone());
        self.run(move |s| s.create(&table, &payload)).await
    }

    async fn update(&self, table: &str, filter: &RowFilter, payload: &Row) -> Result<u64, RemoteError> {
        let (table, filter, payload) = (table.to_string(), filter.clone(), payload.clone());
        self.run(move |s| s.update(&table, &filter, &payload)).await
    }

    async fn delete(&self, table: &str, filter: &RowFilter) -> Result<u64, RemoteError> {
        let (table, filter) = (table.to_string(), filter.clone());
        self.run(move |s| s.delete(&table, &filter)).await
    }
}
