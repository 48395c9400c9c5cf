use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::row::{Row, RowFilter};
use super::traits::{RemoteError, RemoteStore};

/// In-process remote store.
///
/// Behaves like a spreadsheet with a fixed set of sheets: unknown tables
/// are rejected, rows keep insertion order, and filters use the same
/// equality rule as the read cache. Handy for tests, demos and running the
/// service without network access.
pub struct InMemoryRemote {
    tables: Mutex<HashMap<String, Vec<Row>>>,
}

impl InMemoryRemote {
    /// Create a store with the given (empty) tables.
    #[must_use]
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: Mutex::new(tables.into_iter().map(|t| (t.into(), Vec::new())).collect()),
        }
    }

    /// Seed a table with rows, creating it if needed.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.lock().insert(table.to_string(), rows);
    }

    /// Direct snapshot of a table, bypassing the async API.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Number of rows in a table.
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, Vec::len)
    }

    /// Append a row directly, as a human editing the sheet would.
    pub fn push_out_of_band(&self, table: &str, row: Row) {
        self.tables.lock().entry(table.to_string()).or_default().push(row);
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError> {
        self.tables
            .lock()
            .get(table)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownTable(table.to_string()))
    }

    async fn create(&self, table: &str, payload: &Row) -> Result<Row, RemoteError> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| RemoteError::UnknownTable(table.to_string()))?;
        rows.push(payload.clone());
        Ok(payload.clone())
    }

    async fn update(&self, table: &str, filter: &RowFilter, payload: &Row) -> Result<u64, RemoteError> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| RemoteError::UnknownTable(table.to_string()))?;
        let mut affected = 0;
        for row in rows.iter_mut().filter(|row| filter.matches(row)) {
            for (column, value) in payload {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, filter: &RowFilter) -> Result<u64, RemoteError> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| RemoteError::UnknownTable(table.to_string()))?;
        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok((before - rows.len()) as u64)
    }
}
