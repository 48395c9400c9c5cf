// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row and filter primitives.
//!
//! A [`Row`] is a flat mapping from column name to a JSON scalar, exactly as
//! the remote store hands it back. A [`RowFilter`] is a set of equality
//! criteria; the same matching rule is used by cache queries, optimistic
//! patches and the in-memory remote adapter.
//!
//! # Example
//!
//! ```
//! use sheet_sync::{RowFilter, row_from};
//! use serde_json::json;
//!
//! let row = row_from(json!({"product_id": 1001, "price_per_unit": 150.0}));
//!
//! assert!(RowFilter::new().eq("product_id", 1001).matches(&row));
//! // Type-sensitive: a string never equals a number
//! assert!(!RowFilter::new().eq("product_id", "1001").matches(&row));
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One row of a remote table.
pub type Row = Map<String, Value>;

/// Build a [`Row`] from a JSON object literal.
///
/// Non-object values produce an empty row.
#[must_use]
pub fn row_from(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Equality match criteria: every `(column, value)` pair must match.
///
/// Comparison is `serde_json::Value` equality with no coercion, so `1`,
/// `1.0` and `"1"` are three different values. A column missing from the row
/// compares as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowFilter(Map<String, Value>);

impl RowFilter {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Add an equality criterion.
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    /// Check whether `row` satisfies every criterion.
    ///
    /// An empty filter matches every row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.0
            .iter()
            .all(|(column, expected)| row.get(column).unwrap_or(&Value::Null) == expected)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Borrow the criteria as a plain JSON map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RowFilter {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<RowFilter> for Map<String, Value> {
    fn from(filter: RowFilter) -> Self {
        filter.0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RowFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Rank of a JSON value's type in the total order used for sorting.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values.
///
/// `null < bool < number < string < array < object`. Numbers compare by
/// exact mathematical value, including integer/float pairs beyond 2^53, so
/// `2` and `2.0` are equal and `2^53 + 1` is greater than `2^53 as f64`.
/// Arrays compare element-wise, objects only by size (rows are flat, so
/// objects inside a cell are rare and only need a consistent position).
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                match compare_values(left, right) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// 2^127, the first float past the `i128` range.
const I128_BOUND: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

fn integer_value(n: &Number) -> Option<i128> {
    n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from))
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (integer_value(x), integer_value(y)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(x), None) => compare_int_float(x, y.as_f64().unwrap_or(f64::NAN)),
        (None, Some(y)) => compare_int_float(y, x.as_f64().unwrap_or(f64::NAN)).reverse(),
        (None, None) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            // partial_cmp keeps -0.0 == 0.0, matching the integer 0
            x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
        }
    }
}

/// Exact comparison of an integer against a float.
///
/// JSON numbers are never NaN; one is ranked above every integer only to
/// keep the function total.
fn compare_int_float(int: i128, float: f64) -> Ordering {
    if float.is_nan() || float >= I128_BOUND {
        return Ordering::Less;
    }
    if float < -I128_BOUND {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i128)) {
        // int == whole: the fractional part decides
        Ordering::Equal => whole.partial_cmp(&float).unwrap_or(Ordering::Equal),
        other => other,
    }
}
