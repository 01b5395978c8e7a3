//! Query backends.
//!
//! A backend executes the statements produced by the planner and returns
//! flat rows keyed by qualified column label. Two in-process backends are
//! provided: [`MemoryBackend`] for tests and [`SledBackend`] for persistent
//! tables. Both evaluate statements with the same hash-join evaluator.

mod evaluate;
mod filter;
mod memory;
mod sled_store;

pub use evaluate::execute;
pub use filter::FilterEvaluator;
pub use memory::MemoryBackend;
pub use sled_store::SledBackend;

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::Registry;
use crate::error::Error;
use crate::persist::{prepare_for_save, FieldInput};
use crate::query::Statement;
use joinery_proto::{ResultRow, Value};

/// Executes planned statements.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Execute one statement and return its rows.
    async fn execute(&self, statement: Statement<'_>) -> Result<Vec<ResultRow>, Error>;
}

/// Row storage addressed by table name.
///
/// Rows are keyed by backend column name, not by qualified label.
pub trait TableStore: Send + Sync {
    /// All rows of a table, in insertion order. A missing table is empty.
    fn scan(&self, table: &str) -> Result<Vec<ResultRow>, Error>;

    /// Append a row to a table.
    fn insert(&self, table: &str, row: ResultRow) -> Result<(), Error>;

    /// Next free integer key of a table's key column.
    fn next_key(&self, table: &str, column: &str) -> Result<i64, Error> {
        let max = self
            .scan(table)?
            .iter()
            .filter_map(|row| row.get(column).as_i64())
            .max()
            .unwrap_or(0);
        max.checked_add(1).ok_or_else(|| {
            Error::Persistence(format!("no integer key left after {} in '{}'", max, table))
        })
    }

    /// Prepare and store a row of `entity`, returning its primary key.
    fn save(
        &self,
        registry: &Registry,
        entity: &str,
        values: Vec<(String, FieldInput)>,
    ) -> Result<Value, Error> {
        let mut prepared = prepare_for_save(registry, entity, values)?;
        if let Some(generated) = &prepared.generated_key {
            let next = self.next_key(&prepared.table, &generated.column)?;
            prepared
                .row
                .insert(generated.column.clone(), generated.field_type.integer_value(next)?);
        }
        let key = prepared.row.get(&prepared.key_column).clone();
        debug!(entity, table = %prepared.table, key = %key, "saving row");
        self.insert(&prepared.table, prepared.row)?;
        Ok(key)
    }
}
