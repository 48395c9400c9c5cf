// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Client-side queries over a cached table snapshot.
//!
//! Evaluation order is fixed: equality filter → multi-key sort → offset → limit.
//!
//! # Example
//!
//! ```
//! use sheet_sync::{TableQuery, SortKey, RowFilter};
//!
//! let query = TableQuery::new()
//!     .filter(RowFilter::new().eq("category", "Perfume"))
//!     .sort_by(SortKey::desc("price_per_unit"))
//!     .sort_by("product_name".parse::<SortKey>().unwrap())
//!     .offset(10)
//!     .limit(5);
//!
//! assert_eq!(query.sort.len(), 2);
//! ```

use std::cmp::Ordering;
use std::convert::Infallible;
use std::str::FromStr;

use serde_json::Value;

use crate::row::{compare_values, Row, RowFilter};

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One component of a composite sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub order: SortOrder,
}

impl SortKey {
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), order: SortOrder::Ascending }
    }

    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), order: SortOrder::Descending }
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let left = a.get(&self.column).unwrap_or(&Value::Null);
        let right = b.get(&self.column).unwrap_or(&Value::Null);
        let ord = compare_values(left, right);
        match self.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    }
}

/// Parses `"column"` as ascending and `"-column"` as descending.
impl FromStr for SortKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.strip_prefix('-') {
            Some(column) => Self::desc(column),
            None => Self::asc(s),
        })
    }
}

/// A query against one cached table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableQuery {
    pub filter: Option<RowFilter>,
    pub sort: Vec<SortKey>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl TableQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Append a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` passes the filter stage.
    #[must_use]
    pub fn admits(&self, row: &Row) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(row))
    }

    /// Apply sort, offset and limit to rows that already passed [`admits`](Self::admits).
    ///
    /// The sort is stable: rows equal on every key keep their snapshot order.
    #[must_use]
    pub fn finish(&self, mut rows: Vec<Row>) -> Vec<Row> {
        if !self.sort.is_empty() {
            rows.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|key| key.compare(a, b))
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let offset = self.offset.unwrap_or(0);
        let rows = rows.into_iter().skip(offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }

    /// Run the full pipeline over a borrowed snapshot.
    #[must_use]
    pub fn apply(&self, rows: &[Row]) -> Vec<Row> {
        let admitted = rows.iter().filter(|row| self.admits(row)).cloned().collect();
        self.finish(admitted)
    }
}
