//! Join planning.
//!
//! The planner turns a [`RelationTree`] into a dialect-agnostic [`JoinPlan`]:
//! one aliased node per tree node, one join step per edge, the projected
//! columns of every node, and the ordering. For prefetch loading it builds
//! [`FetchStatement`]s instead: one keyed "in set" query per relation level.

use crate::catalog::{EntityDef, Registry, RelationDef, RelationKind};
use crate::error::Error;
use joinery_proto::{
    qualified, FilterExpr, LoadQuery, OrderDirection, Projection, ResultRow, SimpleFilter, Value,
};
use tracing::debug;

use super::instance::Instance;
use super::path::{RelationNode, RelationTree};

/// A field selected from a node, with its backend column and row label.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    /// Field name on the entity.
    pub field: String,
    /// Backend column.
    pub column: String,
    /// Qualified label in result rows (`"t1.name"`).
    pub label: String,
}

impl ColumnRef {
    fn new(alias: &str, field: &str, column: &str) -> Self {
        Self {
            field: field.to_string(),
            column: column.to_string(),
            label: qualified(alias, column),
        }
    }
}

/// One aliased occurrence of an entity in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    /// Alias unique within the statement (`"t0"` is the root).
    pub alias: String,
    /// Entity name.
    pub entity: String,
    /// Backend table.
    pub table: String,
    /// Canonical relation path (empty for the root).
    pub path: String,
    /// Index of the parent node.
    pub parent: Option<usize>,
    /// Relation name on the parent entity.
    pub relation: Option<String>,
    /// Whether the parent holds a sequence of these.
    pub to_many: bool,
    /// Whether the caller asked for this node.
    pub requested: bool,
    /// Primary key column.
    pub primary_key: ColumnRef,
    /// Projected columns, primary key included.
    pub columns: Vec<ColumnRef>,
}

impl PlanNode {
    /// Label of a projected field.
    pub fn label_of(&self, field: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.label.as_str())
    }

    /// Build an instance from this node's columns of a result row.
    pub fn materialize(&self, row: &ResultRow) -> Instance {
        let fields = self
            .columns
            .iter()
            .map(|c| (c.field.clone(), row.get(&c.label).clone()))
            .collect();
        Instance::new(&self.entity, &self.primary_key.field, fields)
    }
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Drop the parent row when nothing matches.
    Inner,
    /// Keep the parent row with nulls when nothing matches.
    Left,
}

/// Link table traversed by a many-to-many join.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughStep {
    /// Alias of the link table.
    pub alias: String,
    /// Link table.
    pub table: String,
    /// Link column matched against the parent's key.
    pub source_column: String,
    /// Link column matched against the child's key.
    pub target_column: String,
}

/// One join edge: `parent.parent_column = child.child_column`, possibly via a
/// link table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    /// Parent node index.
    pub parent: usize,
    /// Child node index.
    pub child: usize,
    /// Join type.
    pub kind: JoinKind,
    /// Column on the parent.
    pub parent_column: String,
    /// Column on the child.
    pub child_column: String,
    /// Link table for many-to-many relations.
    pub through: Option<ThroughStep>,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOrder {
    /// Node index.
    pub node: usize,
    /// Backend column.
    pub column: String,
    /// Row label.
    pub label: String,
    /// Direction.
    pub direction: OrderDirection,
    /// Whether the caller asked for this term, as opposed to a key tie-breaker.
    pub explicit: bool,
}

/// Where limit and offset apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClause {
    /// No pagination.
    None,
    /// Bounds distinct root rows before the joins are expanded.
    Root { limit: Option<u32>, offset: u32 },
    /// Bounds the joined row stream.
    Raw { limit: Option<u32>, offset: u32 },
}

/// A single joined query.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    /// Nodes in pre-order; node 0 is the root.
    pub nodes: Vec<PlanNode>,
    /// Join steps, parents before children.
    pub steps: Vec<JoinStep>,
    /// Ordering by segment: the root with its to-one chain first, then each
    /// to-many node with its own to-one chain, in path order.
    pub order_by: Vec<PlanOrder>,
    /// Filter on root columns.
    pub filter: Option<FilterExpr>,
    /// Pagination.
    pub limit: LimitClause,
}

impl JoinPlan {
    /// The root node.
    pub fn root(&self) -> &PlanNode {
        &self.nodes[0]
    }

    /// Join steps leaving a node.
    pub fn children(&self, node: usize) -> impl Iterator<Item = &JoinStep> {
        self.steps.iter().filter(move |s| s.parent == node)
    }

    /// Step that joins a node to its parent.
    pub fn step_into(&self, node: usize) -> Option<&JoinStep> {
        self.steps.iter().find(|s| s.child == node)
    }

    /// Node index for a canonical path.
    pub fn node_for_path(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.path == path)
    }

    /// Whether a node is the root or reached from it through to-one joins
    /// only, so that it holds at most one row per root.
    pub fn is_single_valued(&self, node: usize) -> bool {
        self.segment_head(node) == 0
    }

    /// The nearest to-many node at or above `node`, or the root.
    pub fn segment_head(&self, node: usize) -> usize {
        let mut current = node;
        while current > 0 && !self.nodes[current].to_many {
            match self.nodes[current].parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Ordering terms of the segment headed by `head`.
    pub fn segment_orders(&self, head: usize) -> impl Iterator<Item = &PlanOrder> {
        self.order_by
            .iter()
            .filter(move |o| self.segment_head(o.node) == head)
    }
}

/// Link traversed by a many-to-many prefetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLink {
    /// Alias of the link table.
    pub alias: String,
    /// Link table.
    pub table: String,
    /// Link column holding the parent key; the key filter applies here.
    pub source_column: String,
    /// Link column matched against the fetched entity's key.
    pub target_column: String,
    /// Row label carrying the parent key.
    pub label: String,
}

/// A keyed query for one prefetch level.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchStatement {
    /// The fetched entity (alias `t0`).
    pub node: PlanNode,
    /// Column filtered by `keys`: on the fetched entity, or on the link table
    /// when `link` is set.
    pub key_column: String,
    /// Key set.
    pub keys: Vec<Value>,
    /// Link table for many-to-many relations.
    pub link: Option<FetchLink>,
    /// Ordering.
    pub order_by: Vec<PlanOrder>,
}

/// A statement handed to a query backend.
#[derive(Debug, Clone, Copy)]
pub enum Statement<'a> {
    /// One joined query.
    Join(&'a JoinPlan),
    /// One keyed prefetch query.
    Fetch(&'a FetchStatement),
}

/// Builds join plans and fetch statements.
pub struct JoinPlanner<'a> {
    registry: &'a Registry,
}

impl<'a> JoinPlanner<'a> {
    /// Create a planner over a registry.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Plan the joined query for a relation tree.
    ///
    /// Projections and ordering are taken from `query` for the root and for
    /// every path in the tree; terms on other paths are ignored here.
    /// Pagination is left unset; see [`super::pagination::apply_limit`].
    pub fn plan(&self, tree: &RelationTree, query: &LoadQuery) -> Result<JoinPlan, Error> {
        let root = self.registry.get_entity(&tree.root)?;
        let mut plan = JoinPlan {
            nodes: vec![self.node(0, root, "", None, None, true, query)?],
            steps: Vec::new(),
            order_by: Vec::new(),
            filter: query
                .filter
                .as_ref()
                .map(|f| map_filter(f, root))
                .transpose()?,
            limit: LimitClause::None,
        };
        // Inner joins only continue an inner chain.
        let mut inner = vec![true];

        self.add_children(&mut plan, &mut inner, 0, root, &tree.children, query)?;
        plan.order_by = self.orders(&mut plan.nodes, query)?;

        debug!(
            root = %tree.root,
            nodes = plan.nodes.len(),
            inner = plan.steps.iter().filter(|s| s.kind == JoinKind::Inner).count(),
            "planned join"
        );
        Ok(plan)
    }

    fn add_children(
        &self,
        plan: &mut JoinPlan,
        inner: &mut Vec<bool>,
        parent: usize,
        parent_def: &EntityDef,
        children: &[RelationNode],
        query: &LoadQuery,
    ) -> Result<(), Error> {
        for child in children {
            let relation = &child.relation;
            let child_def = self.registry.get_entity(&relation.target)?;
            let index = plan.nodes.len();
            let node = self.node(
                index,
                child_def,
                &child.path,
                Some(parent),
                Some(relation),
                child.requested,
                query,
            )?;

            let kind = if relation.is_required() && inner[parent] {
                JoinKind::Inner
            } else {
                JoinKind::Left
            };
            inner.push(kind == JoinKind::Inner);

            let mut step = JoinStep {
                parent,
                child: index,
                kind,
                parent_column: parent_def.column_of(&relation.local_field)?.to_string(),
                child_column: child_def.column_of(&relation.remote_field)?.to_string(),
                through: None,
            };
            if relation.kind == RelationKind::ManyToMany {
                let (table, source_column, target_column) = self.link_columns(relation)?;
                step.through = Some(ThroughStep {
                    alias: format!("l{}", index),
                    table,
                    source_column,
                    target_column,
                });
            }

            plan.nodes.push(node);
            plan.steps.push(step);
            self.add_children(plan, inner, index, child_def, &child.children, query)?;
        }
        Ok(())
    }

    /// Build the prefetch statement for one relation level.
    pub fn fetch(
        &self,
        relation: &RelationDef,
        path: &str,
        keys: Vec<Value>,
        query: &LoadQuery,
    ) -> Result<FetchStatement, Error> {
        let target = self.registry.get_entity(&relation.target)?;
        let node = self.node(0, target, path, None, Some(relation), true, query)?;
        let mut nodes = vec![node];
        let order_by = self.orders(&mut nodes, query)?;
        let node = nodes.remove(0);

        let (key_column, link) = match relation.kind {
            RelationKind::ManyToMany => {
                let (table, source_column, target_column) = self.link_columns(relation)?;
                let link = FetchLink {
                    alias: "l0".to_string(),
                    label: qualified("l0", &source_column),
                    table,
                    source_column: source_column.clone(),
                    target_column,
                };
                (source_column, Some(link))
            }
            RelationKind::ForeignKey | RelationKind::ReverseForeignKey => {
                (target.column_of(&relation.remote_field)?.to_string(), None)
            }
        };

        Ok(FetchStatement {
            node,
            key_column,
            keys,
            link,
            order_by,
        })
    }

    fn link_columns(&self, relation: &RelationDef) -> Result<(String, String, String), Error> {
        let through = relation.through.as_ref().ok_or_else(|| {
            Error::ModelDefinition(format!(
                "many-to-many relation '{}' has no through entity",
                relation.name
            ))
        })?;
        let link = self.registry.get_entity(&through.entity)?;
        Ok((
            link.table_name(),
            link.column_of(&through.source_field)?.to_string(),
            link.column_of(&through.target_field)?.to_string(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn node(
        &self,
        index: usize,
        entity: &EntityDef,
        path: &str,
        parent: Option<usize>,
        relation: Option<&RelationDef>,
        requested: bool,
        query: &LoadQuery,
    ) -> Result<PlanNode, Error> {
        let alias = format!("t{}", index);
        let projection = query
            .projection_for(path)
            .unwrap_or_else(|| Projection::all(path));
        let columns = project(entity, &alias, &projection)?;
        let key = entity.primary_key_field()?;

        Ok(PlanNode {
            primary_key: ColumnRef::new(&alias, &key.name, key.column()),
            alias,
            entity: entity.name.clone(),
            table: entity.table_name(),
            path: path.to_string(),
            parent,
            relation: relation.map(|r| r.name.clone()),
            to_many: relation.is_some_and(RelationDef::is_to_many),
            requested,
            columns,
        })
    }

    /// Resolve ordering terms for the given nodes, adding ordered columns to
    /// the projection.
    ///
    /// Terms are grouped by segment: a to-many node (or the root) together
    /// with the to-one chain below it. Each segment lists its explicit terms
    /// in query order, then a primary key tie-breaker per member node, so a
    /// to-one field orders its owner before the owner's key does.
    fn orders(&self, nodes: &mut [PlanNode], query: &LoadQuery) -> Result<Vec<PlanOrder>, Error> {
        let heads = segment_heads(nodes);
        let mut explicit: Vec<Vec<PlanOrder>> = vec![Vec::new(); nodes.len()];

        for spec in &query.order_by {
            let (path, field) = spec.split();
            let Some(index) = nodes.iter().position(|n| n.path == path) else {
                continue;
            };
            let node = &mut nodes[index];
            let entity = self.registry.get_entity(&node.entity)?;
            let column = entity.column_of(field)?.to_string();
            if node.label_of(field).is_none() {
                node.columns.push(ColumnRef::new(&node.alias, field, &column));
            }
            explicit[heads[index]].push(PlanOrder {
                node: index,
                label: qualified(&node.alias, &column),
                column,
                direction: spec.direction,
                explicit: true,
            });
        }

        let mut order_by = Vec::new();
        for (head, mut terms) in explicit.into_iter().enumerate() {
            if heads[head] != head {
                continue;
            }
            for (index, node) in nodes.iter().enumerate() {
                if heads[index] != head {
                    continue;
                }
                let key = &node.primary_key;
                if !terms.iter().any(|o| o.node == index && o.column == key.column) {
                    terms.push(PlanOrder {
                        node: index,
                        column: key.column.clone(),
                        label: key.label.clone(),
                        direction: OrderDirection::Asc,
                        explicit: false,
                    });
                }
            }
            order_by.extend(terms);
        }
        Ok(order_by)
    }
}

/// Segment head of every node: itself for the root and to-many nodes,
/// otherwise the head of its parent. Nodes are in pre-order.
fn segment_heads(nodes: &[PlanNode]) -> Vec<usize> {
    let mut heads = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        let head = match node.parent {
            Some(parent) if index > 0 && !node.to_many => heads[parent],
            _ => index,
        };
        heads.push(head);
    }
    heads
}

/// Apply a projection to an entity.
///
/// The primary key and every foreign key column survive any projection. Any
/// other field left out must be nullable.
fn project(entity: &EntityDef, alias: &str, projection: &Projection) -> Result<Vec<ColumnRef>, Error> {
    for name in projection.include.iter().chain(&projection.exclude) {
        entity.field(name)?;
    }

    let mut columns = Vec::new();
    for field in &entity.fields {
        let is_key = field.primary_key
            || entity
                .relations
                .iter()
                .any(|r| r.kind == RelationKind::ForeignKey && r.local_field == field.name);
        if is_key || projection.keeps(&field.name) {
            columns.push(ColumnRef::new(alias, &field.name, field.column()));
        } else if !field.nullable {
            return Err(Error::QueryDefinition(format!(
                "field '{}' on '{}' is not nullable and cannot be excluded",
                field.name, entity.name
            )));
        }
    }
    Ok(columns)
}

/// Rewrite a root filter from field names to backend columns.
fn map_filter(filter: &FilterExpr, entity: &EntityDef) -> Result<FilterExpr, Error> {
    let column = |field: &str| entity.column_of(field).map(str::to_string);
    Ok(match filter {
        FilterExpr::Eq { field, value } => FilterExpr::Eq {
            field: column(field)?,
            value: value.clone(),
        },
        FilterExpr::Ne { field, value } => FilterExpr::Ne {
            field: column(field)?,
            value: value.clone(),
        },
        FilterExpr::In { field, values } => FilterExpr::In {
            field: column(field)?,
            values: values.clone(),
        },
        FilterExpr::IsNull { field } => FilterExpr::IsNull {
            field: column(field)?,
        },
        FilterExpr::IsNotNull { field } => FilterExpr::IsNotNull {
            field: column(field)?,
        },
        FilterExpr::And(terms) => FilterExpr::And(
            terms
                .iter()
                .map(|term| {
                    Ok(match term {
                        SimpleFilter::Eq { field, value } => SimpleFilter::Eq {
                            field: column(field)?,
                            value: value.clone(),
                        },
                        SimpleFilter::Ne { field, value } => SimpleFilter::Ne {
                            field: column(field)?,
                            value: value.clone(),
                        },
                        SimpleFilter::In { field, values } => SimpleFilter::In {
                            field: column(field)?,
                            values: values.clone(),
                        },
                        SimpleFilter::IsNull { field } => SimpleFilter::IsNull {
                            field: column(field)?,
                        },
                        SimpleFilter::IsNotNull { field } => SimpleFilter::IsNotNull {
                            field: column(field)?,
                        },
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?,
        ),
    })
}
