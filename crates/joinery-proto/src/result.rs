//! Result rows returned by a query backend.

use std::collections::HashMap;

use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Build the qualified label of a column inside a statement (`"t1.name"`).
pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, column)
}

/// One flat row of a (possibly joined) result.
///
/// Values are keyed by qualified column label. A label missing from the row
/// reads as null, which is how unmatched left joins surface.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
pub struct ResultRow {
    values: HashMap<String, Value>,
}

static NULL: Value = Value::Null;

impl ResultRow {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value (builder style).
    pub fn with(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(label.into(), value.into());
        self
    }

    /// Set a value.
    pub fn insert(&mut self, label: impl Into<String>, value: Value) {
        self.values.insert(label.into(), value);
    }

    /// Get a value, or null when the label is absent.
    pub fn get(&self, label: &str) -> &Value {
        self.values.get(label).unwrap_or(&NULL)
    }

    /// Check whether a label is present.
    pub fn contains(&self, label: &str) -> bool {
        self.values.contains_key(label)
    }

    /// Number of labelled values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(label, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for ResultRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_label_reads_as_null() {
        let row = ResultRow::new().with("t0.id", 1i64).with("t0.name", "Ann");

        assert_eq!(row.get("t0.id"), &Value::Int64(1));
        assert_eq!(row.get("t1.id"), &Value::Null);
        assert!(row.contains("t0.name"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_qualified_label() {
        assert_eq!(qualified("t3", "category_id"), "t3.category_id");
    }
}
