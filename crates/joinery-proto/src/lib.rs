//! Joinery protocol types.
//!
//! This crate defines the data shared between the relation loader and its
//! query backends. Types derive both `rkyv` (for stored rows and cached
//! queries) and `serde` (for JSON configuration and fixtures).
//!
//! # Modules
//!
//! - [`value`] - Scalar values and their hashable key form
//! - [`query`] - Load-query IR (paths, projections, ordering, pagination)
//! - [`result`] - Flat result rows
//! - [`error`] - Protocol error types

pub mod error;
pub mod query;
pub mod result;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use query::{
    canonical_path, join_path, split_path, FilterExpr, LoadQuery, OrderDirection, OrderSpec,
    Pagination, Projection, SimpleFilter, HOP_DELIMITER,
};
pub use result::{qualified, ResultRow};
pub use value::{Value, ValueKey};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let value = Value::String("hello".into());
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&value).unwrap();
        let archived =
            rkyv::access::<value::ArchivedValue, rkyv::rancor::Error>(&bytes).unwrap();
        let deserialized: Value =
            rkyv::deserialize::<Value, rkyv::rancor::Error>(archived).unwrap();
        assert_eq!(value, deserialized);
    }

    #[test]
    fn test_row_roundtrip() {
        let row = ResultRow::new()
            .with("t0.id", 1i64)
            .with("t1.title", "Algebra")
            .with("t1.rating", Value::Null);

        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&row).unwrap();
        let deserialized: ResultRow =
            rkyv::from_bytes::<ResultRow, rkyv::rancor::Error>(&bytes).unwrap();
        assert_eq!(row, deserialized);
    }
}
