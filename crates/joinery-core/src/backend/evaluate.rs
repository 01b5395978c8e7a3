//! In-process execution of statements over a [`TableStore`].
//!
//! Joins are hash joins: each child table is indexed once by its join column
//! and probed with the parent values. Root pagination narrows the roots after
//! their to-one joins and before any to-many join is expanded; raw
//! pagination slices the final row stream.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::query::{
    FetchStatement, JoinKind, JoinPlan, JoinStep, LimitClause, PlanNode, PlanOrder, Statement,
};
use joinery_proto::{OrderDirection, ResultRow, Value, ValueKey};

use super::filter::FilterEvaluator;
use super::TableStore;

/// Execute a statement against a store.
pub fn execute<S: TableStore + ?Sized>(
    store: &S,
    statement: Statement<'_>,
) -> Result<Vec<ResultRow>, Error> {
    match statement {
        Statement::Join(plan) => execute_join(store, plan),
        Statement::Fetch(fetch) => execute_fetch(store, fetch),
    }
}

fn execute_join<S: TableStore + ?Sized>(store: &S, plan: &JoinPlan) -> Result<Vec<ResultRow>, Error> {
    let root = plan.root();
    let mut roots = store.scan(&root.table)?;
    if let Some(filter) = &plan.filter {
        roots.retain(|row| FilterEvaluator::evaluate(filter, row));
    }

    let mut tables: Vec<Vec<ResultRow>> = Vec::with_capacity(plan.steps.len());
    let mut links: Vec<Option<Vec<ResultRow>>> = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        tables.push(store.scan(&plan.nodes[step.child].table)?);
        links.push(match &step.through {
            Some(through) => Some(store.scan(&through.table)?),
            None => None,
        });
    }

    let mut combos: Vec<Combo<'_>> = roots
        .iter()
        .map(|row| {
            let mut combo = vec![None; plan.nodes.len()];
            combo[0] = Some(row);
            combo
        })
        .collect();

    // To-one joins from the root keep one combination per root, so the
    // roots can be ordered by related fields and paginated before fan-out.
    let (single, fanned): (Vec<usize>, Vec<usize>) =
        (0..plan.steps.len()).partition(|&i| plan.is_single_valued(plan.steps[i].child));
    for &i in &single {
        combos = join_step(combos, &plan.steps[i], &tables[i], links[i].as_deref());
    }
    let root_terms: Vec<&PlanOrder> = plan.segment_orders(0).collect();
    sort_combos(&mut combos, &root_terms);
    if let LimitClause::Root { limit, offset } = plan.limit {
        combos = paginate(combos, limit, offset);
    }
    for &i in &fanned {
        combos = join_step(combos, &plan.steps[i], &tables[i], links[i].as_deref());
    }

    let mut rows: Vec<ResultRow> = combos
        .iter()
        .map(|combo| {
            let mut row = ResultRow::new();
            for (node, source) in plan.nodes.iter().zip(combo) {
                project_into(&mut row, node, *source);
            }
            row
        })
        .collect();

    let terms: Vec<&PlanOrder> = plan.order_by.iter().collect();
    sort_rows(&mut rows, &terms, |term| term.label.as_str());
    if let LimitClause::Raw { limit, offset } = plan.limit {
        rows = paginate(rows, limit, offset);
    }
    Ok(rows)
}

/// Source row per plan node; `None` where a left join found nothing.
type Combo<'a> = Vec<Option<&'a ResultRow>>;

fn join_step<'a>(
    combos: Vec<Combo<'a>>,
    step: &JoinStep,
    children: &'a [ResultRow],
    links: Option<&'a [ResultRow]>,
) -> Vec<Combo<'a>> {
    let children = index_by(children, &step.child_column);
    let link_index = match (&step.through, links) {
        (Some(through), Some(rows)) => Some((through, index_by(rows, &through.source_column))),
        _ => None,
    };

    let mut next = Vec::with_capacity(combos.len());
    for combo in combos {
        let key = combo[step.parent].and_then(|parent| parent.get(&step.parent_column).key());
        let matches: Vec<&ResultRow> = match (key, &link_index) {
            (None, _) => Vec::new(),
            (Some(key), Some((through, link_rows))) => link_rows
                .get(&key)
                .into_iter()
                .flatten()
                .filter_map(|link| link.get(&through.target_column).key())
                .flat_map(|target| children.get(&target).into_iter().flatten().copied())
                .collect(),
            (Some(key), None) => children.get(&key).cloned().unwrap_or_default(),
        };

        if matches.is_empty() {
            if step.kind == JoinKind::Left {
                next.push(combo);
            }
            continue;
        }
        for matched in matches {
            let mut expanded = combo.clone();
            expanded[step.child] = Some(matched);
            next.push(expanded);
        }
    }
    next
}

fn execute_fetch<S: TableStore + ?Sized>(
    store: &S,
    fetch: &FetchStatement,
) -> Result<Vec<ResultRow>, Error> {
    let node = &fetch.node;
    let keys: HashSet<ValueKey> = fetch.keys.iter().filter_map(Value::key).collect();
    let in_keys = |row: &ResultRow, column: &str| {
        row.get(column)
            .key()
            .is_some_and(|key| keys.contains(&key))
    };

    let mut rows = Vec::new();
    match &fetch.link {
        None => {
            for source in store.scan(&node.table)? {
                if in_keys(&source, &fetch.key_column) {
                    let mut row = ResultRow::new();
                    project_into(&mut row, node, Some(&source));
                    rows.push(row);
                }
            }
        }
        Some(link) => {
            let targets = store.scan(&node.table)?;
            let by_key = index_by(&targets, &node.primary_key.column);
            for link_row in store.scan(&link.table)? {
                if !in_keys(&link_row, &link.source_column) {
                    continue;
                }
                let Some(target_key) = link_row.get(&link.target_column).key() else {
                    continue;
                };
                for target in by_key.get(&target_key).into_iter().flatten() {
                    let mut row = ResultRow::new();
                    project_into(&mut row, node, Some(*target));
                    row.insert(link.label.clone(), link_row.get(&link.source_column).clone());
                    rows.push(row);
                }
            }
        }
    }

    let terms: Vec<&PlanOrder> = fetch.order_by.iter().collect();
    sort_rows(&mut rows, &terms, |term| term.label.as_str());
    Ok(rows)
}

/// Copy a node's projected columns into a joined row, as nulls when the
/// node had no match.
fn project_into(row: &mut ResultRow, node: &PlanNode, source: Option<&ResultRow>) {
    for column in &node.columns {
        let value = source
            .map(|s| s.get(&column.column).clone())
            .unwrap_or(Value::Null);
        row.insert(column.label.clone(), value);
    }
}

fn index_by<'a>(rows: &'a [ResultRow], column: &str) -> HashMap<ValueKey, Vec<&'a ResultRow>> {
    let mut index: HashMap<ValueKey, Vec<&'a ResultRow>> = HashMap::new();
    for row in rows {
        if let Some(key) = row.get(column).key() {
            index.entry(key).or_default().push(row);
        }
    }
    index
}

/// Stable sort of joined combinations on source columns, before projection.
fn sort_combos(combos: &mut [Combo<'_>], terms: &[&PlanOrder]) {
    if terms.is_empty() {
        return;
    }
    let null = Value::Null;
    combos.sort_by(|a, b| {
        for term in terms {
            let left = a[term.node].map_or(&null, |row| row.get(&term.column));
            let right = b[term.node].map_or(&null, |row| row.get(&term.column));
            let ordering = directed(term, left.sort_cmp(right));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn directed(term: &PlanOrder, ordering: Ordering) -> Ordering {
    match term.direction {
        OrderDirection::Asc => ordering,
        OrderDirection::Desc => ordering.reverse(),
    }
}

/// Stable sort; nulls first ascending, last descending.
fn sort_rows<F>(rows: &mut [ResultRow], terms: &[&PlanOrder], label: F)
where
    F: Fn(&PlanOrder) -> &str,
{
    if terms.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for term in terms {
            let key = label(term);
            let ordering = directed(term, a.get(key).sort_cmp(b.get(key)));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn paginate<T>(rows: Vec<T>, limit: Option<u32>, offset: u32) -> Vec<T> {
    let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset as usize).take(take).collect()
}
