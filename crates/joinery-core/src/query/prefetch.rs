//! Sequential prefetch loading.
//!
//! Relations are loaded breadth-first, one keyed statement per tree node.
//! Each statement asks for the children whose join key is in the set of
//! keys harvested from the previous level; children are matched back to
//! their parents in memory. Statements run strictly one after another and
//! cancellation is checked before each.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::backend::QueryBackend;
use crate::catalog::Registry;
use crate::error::Error;
use joinery_proto::{LoadQuery, ResultRow, Value, ValueKey};

use super::instance::{Instance, InstanceRef, RelationValue};
use super::path::{RelationNode, RelationTree};
use super::planner::{FetchStatement, JoinPlanner, Statement};
use super::reassemble::Materialization;

/// Runs the prefetch levels of a load against a backend.
pub struct PrefetchExecutor<'a, B: QueryBackend + ?Sized> {
    registry: &'a Registry,
    backend: &'a B,
    query: &'a LoadQuery,
    materialization: Materialization,
    max_rows: usize,
    cancellation: Option<&'a CancellationToken>,
}

impl<'a, B: QueryBackend + ?Sized> PrefetchExecutor<'a, B> {
    /// Create an executor. `query` supplies projections and ordering.
    pub fn new(registry: &'a Registry, backend: &'a B, query: &'a LoadQuery) -> Self {
        Self {
            registry,
            backend,
            query,
            materialization: Materialization::Shared,
            max_rows: usize::MAX,
            cancellation: None,
        }
    }

    /// How fetched children are attached to their parents.
    pub fn with_materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self
    }

    /// Bound the rows one statement may return.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Abort between statements once `token` is cancelled.
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Load every relation of `tree` onto `roots`, in place.
    ///
    /// Nodes whose relation is already loaded on all parents (by a joined
    /// query) are not fetched again; their children seed the next level.
    /// Returns the number of statements issued.
    pub async fn run(&self, roots: &[InstanceRef], tree: &RelationTree) -> Result<usize, Error> {
        let planner = JoinPlanner::new(self.registry);
        let mut queue: VecDeque<(&RelationNode, Vec<InstanceRef>)> = tree
            .children
            .iter()
            .map(|node| (node, roots.to_vec()))
            .collect();
        let mut statements = 0;

        while let Some((node, parents)) = queue.pop_front() {
            if parents.is_empty() {
                trace!(path = %node.path, "no parents, skipping level");
                continue;
            }
            let children = if parents.iter().all(|p| p.is_loaded(node.name())) {
                trace!(path = %node.path, "relation already joined");
                distinct(parents.iter().flat_map(|p| p.many(node.name())))
            } else {
                let (children, issued) = self.load_level(&planner, node, &parents).await?;
                statements += issued;
                children
            };
            for child in &node.children {
                queue.push_back((child, children.clone()));
            }
        }
        Ok(statements)
    }

    async fn load_level(
        &self,
        planner: &JoinPlanner<'_>,
        node: &RelationNode,
        parents: &[InstanceRef],
    ) -> Result<(Vec<InstanceRef>, usize), Error> {
        let relation = &node.relation;

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for parent in parents {
            if let Some(value) = parent.get(&relation.local_field) {
                if let Some(key) = value.key() {
                    if seen.insert(key) {
                        keys.push(value.clone());
                    }
                }
            }
        }

        let mut issued = 0;
        let mut matches: HashMap<ValueKey, Vec<InstanceRef>> = HashMap::new();
        if !keys.is_empty() {
            self.check_cancelled()?;
            let fetch = planner.fetch(relation, &node.path, keys, self.query)?;
            debug!(
                path = %node.path,
                entity = %fetch.node.entity,
                keys = fetch.keys.len(),
                "prefetching relation level"
            );
            let rows = self.backend.execute(Statement::Fetch(&fetch)).await?;
            issued = 1;
            if rows.len() > self.max_rows {
                return Err(Error::QueryDefinition(format!(
                    "prefetch of '{}' returned {} rows, more than the limit of {}",
                    node.path,
                    rows.len(),
                    self.max_rows
                )));
            }
            matches = index_children(&fetch, &relation.remote_field, &rows);
        }

        let mut attached = Vec::new();
        for parent in parents {
            let key = parent.get(&relation.local_field).and_then(Value::key);
            let found = key.and_then(|k| matches.get(&k)).cloned().unwrap_or_default();
            let value = if relation.is_to_many() {
                RelationValue::Many(found.iter().map(|c| self.attach(c)).collect())
            } else {
                match found.first() {
                    Some(child) => RelationValue::One(self.attach(child)),
                    None if relation.is_required() => {
                        return Err(Error::IntegrityViolation {
                            entity: parent.entity().to_string(),
                            relation: relation.name.clone(),
                            key: parent
                                .get(&relation.local_field)
                                .map_or_else(|| Value::Null.to_string(), |v| v.to_string()),
                        });
                    }
                    None => RelationValue::Absent,
                }
            };
            attached.extend(value.instances());
            parent.set_relation(relation.name.clone(), value);
        }

        let children = distinct(attached);
        trace!(path = %node.path, children = children.len(), "attached relation level");
        Ok((children, issued))
    }

    fn attach(&self, child: &InstanceRef) -> InstanceRef {
        match self.materialization {
            Materialization::Shared => child.clone(),
            Materialization::Distinct => child.detached().into_ref(),
        }
    }

    fn check_cancelled(&self) -> Result<(), Error> {
        if self.cancellation.is_some_and(|t| t.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Materialise fetched rows, one instance per primary key, grouped by the
/// parent key each row answers to.
fn index_children(
    fetch: &FetchStatement,
    remote_field: &str,
    rows: &[ResultRow],
) -> HashMap<ValueKey, Vec<InstanceRef>> {
    let node = &fetch.node;
    // Many-to-many rows carry the parent key in the link column.
    let match_label = match &fetch.link {
        Some(link) => Some(link.label.as_str()),
        None => node.label_of(remote_field),
    };

    let mut identity: HashMap<ValueKey, InstanceRef> = HashMap::new();
    let mut index: HashMap<ValueKey, Vec<InstanceRef>> = HashMap::new();
    for row in rows {
        let Some(parent_key) = match_label.and_then(|label| row.get(label).key()) else {
            continue;
        };
        let Some(child_key) = row.get(&node.primary_key.label).key() else {
            continue;
        };
        let child = identity
            .entry(child_key)
            .or_insert_with(|| node.materialize(row).into_ref())
            .clone();
        let siblings = index.entry(parent_key).or_default();
        if !siblings.iter().any(|c| Instance::same(c, &child)) {
            siblings.push(child);
        }
    }
    index
}

/// Drop repeated handles, keeping first occurrences.
fn distinct(instances: impl IntoIterator<Item = InstanceRef>) -> Vec<InstanceRef> {
    let mut seen = HashSet::new();
    instances
        .into_iter()
        .filter(|instance| seen.insert(Arc::as_ptr(instance)))
        .collect()
}
