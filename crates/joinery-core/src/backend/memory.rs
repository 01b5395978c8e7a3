//! In-memory table store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::Error;
use crate::query::Statement;
use joinery_proto::ResultRow;

use super::{evaluate, QueryBackend, TableStore};

/// Tables held in memory, with a counter of executed statements.
///
/// The counter makes the number of round trips a load issues observable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Vec<ResultRow>>>,
    statements: AtomicU64,
    latency: Option<Duration>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every statement by `latency`, as a remote database would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert rows into a table (builder style).
    pub fn with_rows(self, table: &str, rows: impl IntoIterator<Item = ResultRow>) -> Self {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Number of statements executed so far.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Reset the statement counter.
    pub fn reset_statement_count(&self) {
        self.statements.store(0, Ordering::Relaxed);
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }
}

impl TableStore for MemoryBackend {
    fn scan(&self, table: &str) -> Result<Vec<ResultRow>, Error> {
        Ok(self.tables.read().get(table).cloned().unwrap_or_default())
    }

    fn insert(&self, table: &str, row: ResultRow) -> Result<(), Error> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    async fn execute(&self, statement: Statement<'_>) -> Result<Vec<ResultRow>, Error> {
        let n = self.statements.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(statement = n, "executing statement");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        evaluate::execute(self, statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, Registry, RelationDef, ScalarType};
    use crate::persist::FieldInput;
    use crate::query::{apply_limit, JoinPlan, JoinPlanner, PathResolver};
    use joinery_proto::{FilterExpr, LoadQuery, OrderSpec, Value};

    fn registry() -> Registry {
        Registry::builder()
            .entity(
                EntityDef::new("Category")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("name", ScalarType::String)),
            )
            .entity(
                EntityDef::new("Course")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("name", ScalarType::String))
                    .with_relation(RelationDef::foreign_key("category", "Category"))
                    .with_relation(RelationDef::many_to_many("students", "Student")),
            )
            .entity(
                EntityDef::new("Student")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("name", ScalarType::String)),
            )
            .build()
            .unwrap()
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_rows(
                "categorys",
                vec![ResultRow::new().with("id", 1i64).with("name", "Math")],
            )
            .with_rows(
                "courses",
                vec![
                    ResultRow::new()
                        .with("id", 1i64)
                        .with("name", "Algebra")
                        .with("category_id", 1i64),
                    ResultRow::new()
                        .with("id", 2i64)
                        .with("name", "Poetry")
                        .with("category_id", Value::Null),
                ],
            )
            .with_rows(
                "students",
                (1..=3i64).map(|id| ResultRow::new().with("id", id).with("name", format!("s{}", id))),
            )
            .with_rows(
                "coursestudents",
                (1..=3i64).map(|id| {
                    ResultRow::new()
                        .with("id", id)
                        .with("course", 1i64)
                        .with("student", id)
                }),
            )
    }

    fn plan(registry: &Registry, query: &LoadQuery) -> JoinPlan {
        let resolver = PathResolver::new(registry);
        let mut tree = resolver
            .resolve(&query.root_entity, &query.select_related)
            .unwrap();
        resolver.expand_required(&mut tree).unwrap();
        JoinPlanner::new(registry).plan(&tree, query).unwrap()
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched_roots() {
        let registry = registry();
        let backend = backend();
        let query = LoadQuery::new("Course")
            .select_related("category")
            .with_order(OrderSpec::asc("id"));
        let plan = plan(&registry, &query);

        let rows = backend.execute(Statement::Join(&plan)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("t1.name"), &Value::from("Math"));
        assert!(rows[1].get("t1.id").is_null());
        assert_eq!(backend.statement_count(), 1);
    }

    #[tokio::test]
    async fn test_root_and_raw_limits() {
        let registry = registry();
        let backend = backend();
        let query = LoadQuery::new("Course")
            .select_related("students")
            .with_order(OrderSpec::asc("id"));

        let mut root_limited = plan(&registry, &query);
        apply_limit(&mut root_limited, Some(2), 0, false);
        let rows = backend.execute(Statement::Join(&root_limited)).await.unwrap();
        // Three student rows for course 1, one null-student row for course 2.
        assert_eq!(rows.len(), 4);

        let mut raw_limited = plan(&registry, &query);
        apply_limit(&mut raw_limited, Some(2), 0, true);
        let rows = backend.execute(Statement::Join(&raw_limited)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.get("t0.id") == &Value::Int64(1)));
    }

    #[tokio::test]
    async fn test_filter_applies_to_root() {
        let registry = registry();
        let backend = backend();
        let query = LoadQuery::new("Course").with_filter(FilterExpr::eq("name", "Poetry"));
        let plan = plan(&registry, &query);

        let rows = backend.execute(Statement::Join(&plan)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("t0.id"), &Value::Int64(2));
    }

    #[tokio::test]
    async fn test_many_to_many_fetch_carries_parent_key() {
        let registry = registry();
        let backend = backend();
        let relation = registry.relation("Course", "students").unwrap().clone();
        let query = LoadQuery::new("Course").with_order(OrderSpec::desc("students.id"));
        let fetch = JoinPlanner::new(&registry)
            .fetch(&relation, "students", vec![Value::Int64(1), Value::Int64(2)], &query)
            .unwrap();

        let rows = backend.execute(Statement::Fetch(&fetch)).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|row| row.get("t0.id").clone()).collect();
        assert_eq!(ids, vec![Value::Int64(3), Value::Int64(2), Value::Int64(1)]);
        let link = fetch.link.as_ref().unwrap();
        assert!(rows.iter().all(|row| row.get(&link.label) == &Value::Int64(1)));
    }

    #[test]
    fn test_save_generates_keys() {
        let registry = registry();
        let backend = backend();
        let key = backend
            .save(
                &registry,
                "Student",
                vec![("name".into(), FieldInput::value("s4"))],
            )
            .unwrap();
        assert_eq!(key, Value::Int64(4));
        assert_eq!(backend.row_count("students"), 4);
    }

    #[test]
    fn test_save_rejects_exhausted_keys() {
        let registry = Registry::builder()
            .entity(
                EntityDef::new("Tag")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int32))
                    .with_field(FieldDef::new("label", ScalarType::String)),
            )
            .entity(
                EntityDef::new("Note")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("body", ScalarType::String)),
            )
            .build()
            .unwrap();
        let backend = MemoryBackend::new()
            .with_rows("tags", vec![ResultRow::new().with("id", i32::MAX)])
            .with_rows("notes", vec![ResultRow::new().with("id", i64::MAX)]);

        let tag = backend.save(&registry, "Tag", vec![("label".into(), FieldInput::value("x"))]);
        assert!(matches!(tag, Err(Error::Persistence(_))));
        let note = backend.save(&registry, "Note", vec![("body".into(), FieldInput::value("x"))]);
        assert!(matches!(note, Err(Error::Persistence(_))));
        assert_eq!(backend.row_count("tags"), 1);
        assert_eq!(backend.row_count("notes"), 1);
    }

    #[tokio::test]
    async fn test_latency_and_counter_reset() {
        let backend = MemoryBackend::new().with_latency(Duration::from_millis(1));
        let registry = registry();
        let plan = plan(&registry, &LoadQuery::new("Student"));

        assert!(backend.execute(Statement::Join(&plan)).await.unwrap().is_empty());
        assert_eq!(backend.statement_count(), 1);
        backend.reset_statement_count();
        assert_eq!(backend.statement_count(), 0);
    }
}
