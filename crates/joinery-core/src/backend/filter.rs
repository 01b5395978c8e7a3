//! Filter evaluation against stored rows.

use std::cmp::Ordering;

use joinery_proto::{FilterExpr, ResultRow, SimpleFilter, Value};

/// Evaluates root filters against rows keyed by column.
///
/// Comparisons never match a null column, so `Ne` and `In` skip rows where
/// the column is null, as SQL does.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter expression against a row.
    pub fn evaluate(filter: &FilterExpr, row: &ResultRow) -> bool {
        match filter {
            FilterExpr::Eq { field, value } => Self::compare(row, field, |v| Self::values_equal(v, value)),
            FilterExpr::Ne { field, value } => {
                Self::compare(row, field, |v| !Self::values_equal(v, value))
            }
            FilterExpr::In { field, values } => {
                Self::compare(row, field, |v| values.iter().any(|x| Self::values_equal(v, x)))
            }
            FilterExpr::IsNull { field } => row.get(field).is_null(),
            FilterExpr::IsNotNull { field } => !row.get(field).is_null(),
            FilterExpr::And(filters) => filters.iter().all(|f| Self::evaluate_simple(f, row)),
        }
    }

    /// Evaluate a simple (non-compound) filter.
    fn evaluate_simple(filter: &SimpleFilter, row: &ResultRow) -> bool {
        match filter {
            SimpleFilter::Eq { field, value } => {
                Self::compare(row, field, |v| Self::values_equal(v, value))
            }
            SimpleFilter::Ne { field, value } => {
                Self::compare(row, field, |v| !Self::values_equal(v, value))
            }
            SimpleFilter::In { field, values } => {
                Self::compare(row, field, |v| values.iter().any(|x| Self::values_equal(v, x)))
            }
            SimpleFilter::IsNull { field } => row.get(field).is_null(),
            SimpleFilter::IsNotNull { field } => !row.get(field).is_null(),
        }
    }

    fn compare<F>(row: &ResultRow, field: &str, comparator: F) -> bool
    where
        F: FnOnce(&Value) -> bool,
    {
        let value = row.get(field);
        !value.is_null() && comparator(value)
    }

    /// Check if two values are equal, across integer and float widths.
    fn values_equal(a: &Value, b: &Value) -> bool {
        !b.is_null() && a.sort_cmp(b) == Ordering::Equal
    }
}
