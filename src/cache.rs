// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory read cache.
//!
//! Holds the full row set of every remote table the service knows about.
//! One mutex guards the whole map: tables are small (a spreadsheet, not a
//! database) and every critical section is a copy or an in-place patch, never
//! remote I/O.
//!
//! # Example
//!
//! ```
//! use sheet_sync::{ReadCache, Mutation, RowFilter, TableQuery, row_from};
//! use serde_json::json;
//!
//! let cache = ReadCache::new();
//! cache.replace_table("Товары", vec![row_from(json!({"product_id": 1, "price": 10.0}))]);
//!
//! cache.patch_optimistic("Товары", &Mutation::Update {
//!     filter: RowFilter::new().eq("product_id", 1),
//!     payload: row_from(json!({"price": 12.5})),
//! });
//!
//! let rows = cache.query("Товары", &TableQuery::new().filter(RowFilter::new().eq("product_id", 1)));
//! assert_eq!(rows[0]["price"], json!(12.5));
//! ```

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::operation::Mutation;
use crate::query::TableQuery;
use crate::row::Row;

/// Cached rows of one table.
#[derive(Debug, Clone, Default)]
pub struct CachedTable {
    pub rows: Vec<Row>,
    /// Epoch millis of the last full read from the remote store.
    /// `None` until the table has been fetched at least once.
    pub refreshed_at: Option<i64>,
}

/// Table name → rows, behind a single lock.
#[derive(Debug, Default)]
pub struct ReadCache {
    tables: Mutex<HashMap<String, CachedTable>>,
}

impl ReadCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a table's current rows. Empty if the table was never loaded.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Whether the table has an entry (fetched or optimistically created).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tables.lock().contains_key(name)
    }

    /// Filter, sort and paginate one table.
    ///
    /// Matching rows are copied out under one lock acquisition, so the
    /// result reflects a single consistent snapshot; sorting happens after
    /// the lock is released.
    #[must_use]
    pub fn query(&self, name: &str, query: &TableQuery) -> Vec<Row> {
        let admitted: Vec<Row> = {
            let tables = self.tables.lock();
            match tables.get(name) {
                Some(table) => table.rows.iter().filter(|row| query.admits(row)).cloned().collect(),
                None => return Vec::new(),
            }
        };
        query.finish(admitted)
    }

    /// Swap in a fresh row set from the remote store.
    pub fn replace_table(&self, name: &str, rows: Vec<Row>) {
        let count = rows.len();
        let entry = CachedTable {
            rows,
            refreshed_at: Some(crate::now_millis()),
        };
        self.tables.lock().insert(name.to_string(), entry);
        debug!(table = %name, rows = count, "Cache table replaced");
    }

    /// Apply a mutation's expected effect before the remote store confirms it.
    ///
    /// Returns the number of rows appended, merged or removed. A table with
    /// no entry yet is created empty first, so a CREATE is always visible.
    pub fn patch_optimistic(&self, name: &str, mutation: &Mutation) -> usize {
        let mut tables = self.tables.lock();
        let table = tables.entry(name.to_string()).or_default();

        let affected = match mutation {
            Mutation::Create { payload } => {
                table.rows.push(payload.clone());
                1
            }
            Mutation::Update { filter, payload } => {
                let mut merged = 0;
                for row in table.rows.iter_mut().filter(|row| filter.matches(row)) {
                    for (column, value) in payload {
                        row.insert(column.clone(), value.clone());
                    }
                    merged += 1;
                }
                merged
            }
            Mutation::Delete { filter } => {
                let before = table.rows.len();
                table.rows.retain(|row| !filter.matches(row));
                before - table.rows.len()
            }
        };

        debug!(table = %name, kind = %mutation.kind(), affected, "Optimistic cache patch");
        affected
    }

    /// Epoch millis of the table's last full refresh.
    #[must_use]
    pub fn last_refreshed(&self, name: &str) -> Option<i64> {
        self.tables.lock().get(name).and_then(|t| t.refreshed_at)
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// (tables, total rows)
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        let tables = self.tables.lock();
        (tables.len(), tables.values().map(|t| t.rows.len()).sum())
    }
}
