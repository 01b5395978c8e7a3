//! Row-to-graph reassembly for joined queries.
//!
//! Flat joined rows are grouped by the root key in first-seen order, then,
//! inside each group, by the key of every child node. Each branch is grouped
//! independently, so the cartesian product of two sibling to-many branches
//! collapses back to the distinct children of each branch.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::Error;
use joinery_proto::{OrderDirection, ResultRow, ValueKey};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::instance::{InstanceRef, RelationValue};
use super::planner::JoinPlan;

/// How rows that denote the same entity become instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    /// A fresh instance for every occurrence.
    #[default]
    Distinct,
    /// One instance per entity key, shared by every occurrence.
    Shared,
}

/// Rebuild root instances and their nested relations from joined rows.
pub fn reassemble(
    rows: &[ResultRow],
    plan: &JoinPlan,
    strategy: Materialization,
) -> Result<Vec<InstanceRef>, Error> {
    let mut children = vec![Vec::new(); plan.nodes.len()];
    for step in &plan.steps {
        children[step.parent].push(step.child);
    }

    let mut reassembler = Reassembler {
        plan,
        strategy,
        children,
        shared: HashMap::new(),
    };

    let all: Vec<&ResultRow> = rows.iter().collect();
    let root_label = &plan.root().primary_key.label;
    let groups = group_by_key(&all, root_label);
    if groups.iter().map(|(_, g)| g.len()).sum::<usize>() != rows.len() {
        return Err(Error::Backend(format!(
            "joined row without a value for root key '{}'",
            root_label
        )));
    }

    let roots: Vec<InstanceRef> = groups
        .iter()
        .map(|(key, group)| reassembler.build(0, key, group))
        .collect();
    trace!(rows = rows.len(), roots = roots.len(), "reassembled joined rows");
    Ok(roots)
}

struct Reassembler<'a> {
    plan: &'a JoinPlan,
    strategy: Materialization,
    children: Vec<Vec<usize>>,
    shared: HashMap<(usize, ValueKey), InstanceRef>,
}

impl Reassembler<'_> {
    fn build(&mut self, node: usize, key: &ValueKey, rows: &[&ResultRow]) -> InstanceRef {
        let plan = self.plan;
        let instance = match self.strategy {
            Materialization::Shared => self
                .shared
                .entry((node, key.clone()))
                .or_insert_with(|| materialize(plan, node, rows[0]))
                .clone(),
            Materialization::Distinct => materialize(plan, node, rows[0]),
        };

        for child in self.children[node].clone() {
            let child_node = &plan.nodes[child];
            let groups = group_by_key(rows, &child_node.primary_key.label);
            let value = if child_node.to_many {
                let mut built: Vec<(&ResultRow, InstanceRef)> = groups
                    .iter()
                    .map(|(key, group)| (group[0], self.build(child, key, group)))
                    .collect();
                self.sort_branch(child, &mut built);
                RelationValue::Many(built.into_iter().map(|(_, i)| i).collect())
            } else {
                match groups.first() {
                    Some((key, group)) => RelationValue::One(self.build(child, key, group)),
                    None => RelationValue::Absent,
                }
            };
            let name = child_node.relation.clone().unwrap_or_default();
            instance.set_relation(name, value);
        }
        instance
    }

    /// Stable sort by the explicit ordering of the branch and its to-one
    /// chain; first appearance breaks ties.
    fn sort_branch(&self, node: usize, items: &mut [(&ResultRow, InstanceRef)]) {
        let terms: Vec<_> = self.plan.segment_orders(node).filter(|o| o.explicit).collect();
        if terms.is_empty() {
            return;
        }
        items.sort_by(|(a, _), (b, _)| {
            for term in &terms {
                let ordering = a.get(&term.label).sort_cmp(b.get(&term.label));
                let ordering = match term.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }
}

fn materialize(plan: &JoinPlan, node: usize, row: &ResultRow) -> InstanceRef {
    plan.nodes[node].materialize(row).into_ref()
}

/// Group rows by the value under `label`, in first-seen order. Rows where
/// the value is null (an unmatched left join) belong to no group.
fn group_by_key<'r>(rows: &[&'r ResultRow], label: &str) -> Vec<(ValueKey, Vec<&'r ResultRow>)> {
    let mut index: HashMap<ValueKey, usize> = HashMap::new();
    let mut groups: Vec<(ValueKey, Vec<&'r ResultRow>)> = Vec::new();
    for row in rows {
        let Some(key) = row.get(label).key() else {
            continue;
        };
        match index.get(&key) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, Registry, RelationDef, ScalarType};
    use crate::query::instance::Instance;
    use crate::query::path::PathResolver;
    use crate::query::planner::JoinPlanner;
    use joinery_proto::{LoadQuery, OrderSpec, Value};

    fn registry() -> Registry {
        Registry::builder()
            .entity(
                EntityDef::new("Author")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("name", ScalarType::String)),
            )
            .entity(
                EntityDef::new("Book")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("title", ScalarType::String))
                    .with_relation(RelationDef::foreign_key("author", "Author"))
                    .with_relation(RelationDef::foreign_key("publisher", "Publisher")),
            )
            .entity(
                EntityDef::new("Chapter")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("title", ScalarType::String))
                    .with_relation(RelationDef::foreign_key("book", "Book")),
            )
            .entity(
                EntityDef::new("Award")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_relation(RelationDef::foreign_key("author", "Author")),
            )
            .entity(
                EntityDef::new("Publisher")
                    .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                    .with_field(FieldDef::new("name", ScalarType::String)),
            )
            .build()
            .unwrap()
    }

    fn plan_for(registry: &Registry, query: &LoadQuery) -> JoinPlan {
        let resolver = PathResolver::new(registry);
        let mut tree = resolver
            .resolve(&query.root_entity, &query.select_related)
            .unwrap();
        resolver.expand_required(&mut tree).unwrap();
        JoinPlanner::new(registry).plan(&tree, query).unwrap()
    }

    /// Build a joined row from `(path, field, value)` triples.
    fn row(plan: &JoinPlan, values: &[(&str, &str, Value)]) -> ResultRow {
        let mut row = ResultRow::new();
        for (path, field, value) in values {
            let node = &plan.nodes[plan.node_for_path(path).unwrap()];
            row.insert(node.label_of(field).unwrap(), value.clone());
        }
        row
    }

    fn int(n: i64) -> Value {
        Value::Int64(n)
    }

    #[test]
    fn test_fan_out() {
        let registry = registry();
        let plan = plan_for(&registry, &LoadQuery::new("Author").select_related("books__chapters"));

        let mut rows = Vec::new();
        for book in 1..=3 {
            for chapter in 1..=2 {
                rows.push(row(
                    &plan,
                    &[
                        ("", "id", int(1)),
                        ("", "name", "Ann".into()),
                        ("books", "id", int(book)),
                        ("books", "author_id", int(1)),
                        ("books__chapters", "id", int(book * 10 + chapter)),
                        ("books__chapters", "book_id", int(book)),
                    ],
                ));
            }
        }
        assert_eq!(rows.len(), 6);

        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        assert_eq!(roots.len(), 1);
        let books = roots[0].many("books");
        assert_eq!(books.len(), 3);
        for book in &books {
            assert_eq!(book.many("chapters").len(), 2);
        }
        let leaves: usize = books.iter().map(|b| b.many("chapters").len()).sum();
        assert_eq!(leaves, 6);
    }

    #[test]
    fn test_roots_keep_row_order() {
        let registry = registry();
        let plan = plan_for(&registry, &LoadQuery::new("Book").select_related("publisher"));

        let ids = [3, 1, 4, 2];
        let rows: Vec<ResultRow> = ids
            .iter()
            .map(|&id| {
                row(
                    &plan,
                    &[
                        ("", "id", int(id)),
                        ("publisher", "id", int(100 + id)),
                    ],
                )
            })
            .collect();

        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        let got: Vec<Value> = roots.iter().map(|r| r.pk().cloned().unwrap()).collect();
        assert_eq!(got, ids.iter().map(|&i| int(i)).collect::<Vec<_>>());
        for root in &roots {
            assert!(root.one("publisher").is_some());
        }
    }

    #[test]
    fn test_join_mode_instances_are_distinct() {
        let registry = registry();
        let plan = plan_for(&registry, &LoadQuery::new("Book").select_related("publisher"));
        let rows: Vec<ResultRow> = [1, 2]
            .iter()
            .map(|&id| {
                row(
                    &plan,
                    &[
                        ("", "id", int(id)),
                        ("publisher", "id", int(9)),
                        ("publisher", "name", "Acme".into()),
                    ],
                )
            })
            .collect();

        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        let a = roots[0].one("publisher").unwrap();
        let b = roots[1].one("publisher").unwrap();
        assert!(!Instance::same(&a, &b));
        assert_eq!(a.fields(), b.fields());

        let roots = reassemble(&rows, &plan, Materialization::Shared).unwrap();
        let a = roots[0].one("publisher").unwrap();
        let b = roots[1].one("publisher").unwrap();
        assert!(Instance::same(&a, &b));
    }

    #[test]
    fn test_unmatched_left_join_is_absent() {
        let registry = registry();
        let plan = plan_for(&registry, &LoadQuery::new("Book").select_related("publisher"));
        let rows = vec![row(&plan, &[("", "id", int(1)), ("publisher", "id", Value::Null)])];

        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        assert_eq!(roots.len(), 1);
        assert!(matches!(
            roots[0].related("publisher"),
            Some(RelationValue::Absent)
        ));

        let plan = plan_for(&registry, &LoadQuery::new("Author").select_related("books"));
        let rows = vec![row(&plan, &[("", "id", int(1)), ("books", "id", Value::Null)])];
        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        assert!(roots[0].is_loaded("books"));
        assert!(roots[0].many("books").is_empty());
    }

    #[test]
    fn test_sibling_branches_deduplicated_independently() {
        let registry = registry();
        let plan = plan_for(
            &registry,
            &LoadQuery::new("Author")
                .select_related("books")
                .select_related("awards"),
        );

        let mut rows = Vec::new();
        for book in 1..=2 {
            for award in 1..=3 {
                rows.push(row(
                    &plan,
                    &[
                        ("", "id", int(1)),
                        ("books", "id", int(book)),
                        ("awards", "id", int(award)),
                    ],
                ));
            }
        }

        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].many("books").len(), 2);
        assert_eq!(roots[0].many("awards").len(), 3);
    }

    #[test]
    fn test_branch_order_refines_first_appearance() {
        let registry = registry();
        let plan = plan_for(
            &registry,
            &LoadQuery::new("Author")
                .select_related("books")
                .with_order(OrderSpec::desc("books__title")),
        );
        let rows: Vec<ResultRow> = [(1, "b"), (2, "c"), (3, "a")]
            .iter()
            .map(|&(id, title)| {
                row(
                    &plan,
                    &[
                        ("", "id", int(1)),
                        ("books", "id", int(id)),
                        ("books", "title", title.into()),
                    ],
                )
            })
            .collect();

        let roots = reassemble(&rows, &plan, Materialization::Distinct).unwrap();
        let titles: Vec<String> = roots[0]
            .many("books")
            .iter()
            .map(|b| b.get("title").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_row_without_root_key_rejected() {
        let registry = registry();
        let plan = plan_for(&registry, &LoadQuery::new("Book"));
        let rows = vec![ResultRow::new()];
        assert!(matches!(
            reassemble(&rows, &plan, Materialization::Distinct),
            Err(Error::Backend(_))
        ));
    }
}
