//! Load-query IR.
//!
//! A [`LoadQuery`] describes one relation-loading request: the root entity,
//! which relation paths to load by join (`select_related`) and which to load
//! level by level (`prefetch_related`), per-path projections, a root filter,
//! ordering and pagination.
//!
//! Relation paths use `__` between hops (`"teachers__category"`). Dots are
//! accepted as well, so `"teachers.category"` names the same path.

use crate::error::Error;
use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Canonical delimiter between relation hops.
pub const HOP_DELIMITER: &str = "__";

/// Split a relation path into its hops.
///
/// The empty path (the root entity) has no hops.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split(HOP_DELIMITER)
        .flat_map(|segment| segment.split('.'))
        .collect()
}

/// Append a hop to a canonical path.
pub fn join_path(parent: &str, hop: &str) -> String {
    if parent.is_empty() {
        hop.to_string()
    } else {
        format!("{}{}{}", parent, HOP_DELIMITER, hop)
    }
}

/// Rewrite a path with the canonical delimiter.
pub fn canonical_path(path: &str) -> String {
    split_path(path).join(HOP_DELIMITER)
}

/// A relation-loading request.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct LoadQuery {
    /// The root entity type to load.
    pub root_entity: String,
    /// Relation paths loaded with one joined query.
    pub select_related: Vec<String>,
    /// Relation paths loaded with one query per level.
    pub prefetch_related: Vec<String>,
    /// Per-path field projections (empty path = root entity).
    pub projections: Vec<Projection>,
    /// Optional filter on root entity fields.
    pub filter: Option<FilterExpr>,
    /// Ordering; fields may be path-qualified (`"teachers__name"`).
    pub order_by: Vec<OrderSpec>,
    /// Pagination parameters.
    pub pagination: Option<Pagination>,
}

impl LoadQuery {
    /// Create a new load query for an entity.
    pub fn new(root_entity: impl Into<String>) -> Self {
        Self {
            root_entity: root_entity.into(),
            select_related: vec![],
            prefetch_related: vec![],
            projections: vec![],
            filter: None,
            order_by: vec![],
            pagination: None,
        }
    }

    /// Add a path loaded by join.
    pub fn select_related(mut self, path: impl Into<String>) -> Self {
        self.select_related.push(path.into());
        self
    }

    /// Add a path loaded by sequential queries.
    pub fn prefetch_related(mut self, path: impl Into<String>) -> Self {
        self.prefetch_related.push(path.into());
        self
    }

    /// Add a projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    /// Set the root filter.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Merged projection for a canonical path, if any was given.
    pub fn projection_for(&self, path: &str) -> Option<Projection> {
        let mut merged: Option<Projection> = None;
        for projection in self
            .projections
            .iter()
            .filter(|p| canonical_path(&p.path) == path)
        {
            let entry = merged.get_or_insert_with(|| Projection::all(path));
            entry.include.extend(projection.include.iter().cloned());
            entry.exclude.extend(projection.exclude.iter().cloned());
        }
        merged
    }
}

/// Field projection for one relation path.
///
/// An empty `include` list means every field. `exclude` removes fields from
/// whatever `include` selects.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Projection {
    /// Relation path (empty = root entity).
    pub path: String,
    /// Fields to keep.
    pub include: Vec<String>,
    /// Fields to drop.
    pub exclude: Vec<String>,
}

impl Projection {
    /// A projection that keeps every field.
    pub fn all(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            include: vec![],
            exclude: vec![],
        }
    }

    /// Keep only the given fields.
    pub fn include(path: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            path: path.into(),
            include: fields,
            exclude: vec![],
        }
    }

    /// Drop the given fields.
    pub fn exclude(path: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            path: path.into(),
            include: vec![],
            exclude: fields,
        }
    }

    /// Whether a field survives this projection.
    pub fn keeps(&self, field: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|f| f == field);
        included && !self.exclude.iter().any(|f| f == field)
    }
}

/// Filter expression on root entity fields.
///
/// Note: This uses a flat design without recursive Box types to work with rkyv.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum FilterExpr {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
    /// All conditions must be true (flat list, single level).
    And(Vec<SimpleFilter>),
}

/// A simple (non-compound) filter for use in `And` expressions.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum SimpleFilter {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
}

impl SimpleFilter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        SimpleFilter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an is-null filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        SimpleFilter::IsNull {
            field: field.into(),
        }
    }

    /// Create an is-not-null filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        SimpleFilter::IsNotNull {
            field: field.into(),
        }
    }

    /// The field this condition reads.
    pub fn field(&self) -> &str {
        match self {
            SimpleFilter::Eq { field, .. }
            | SimpleFilter::Ne { field, .. }
            | SimpleFilter::In { field, .. }
            | SimpleFilter::IsNull { field }
            | SimpleFilter::IsNotNull { field } => field,
        }
    }
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equals filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    /// Create an is-null filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNull {
            field: field.into(),
        }
    }

    /// Create an is-not-null filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNotNull {
            field: field.into(),
        }
    }

    /// Create an AND filter combining multiple simple expressions.
    pub fn and(exprs: Vec<SimpleFilter>) -> Self {
        FilterExpr::And(exprs)
    }

    /// Names of all fields read by this filter.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            FilterExpr::Eq { field, .. }
            | FilterExpr::Ne { field, .. }
            | FilterExpr::In { field, .. }
            | FilterExpr::IsNull { field }
            | FilterExpr::IsNotNull { field } => vec![field.as_str()],
            FilterExpr::And(exprs) => exprs.iter().map(|e| e.field()).collect(),
        }
    }
}

/// Ordering specification.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct OrderSpec {
    /// Field to order by, optionally prefixed by a relation path.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create ascending order.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create descending order.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Parse `"name"`, `"-name"` or `"teachers__name"` style specifications.
    ///
    /// A leading `-` means descending.
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let (direction, field) = match spec.strip_prefix('-') {
            Some(rest) => (OrderDirection::Desc, rest),
            None => (OrderDirection::Asc, spec),
        };
        if field.is_empty() || split_path(field).iter().any(|hop| hop.is_empty()) {
            return Err(Error::InvalidPath {
                path: spec.to_string(),
                reason: "empty segment in order specification".into(),
            });
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }

    /// Split into the canonical relation path and the field name.
    pub fn split(&self) -> (String, &str) {
        let hops = split_path(&self.field);
        match hops.split_last() {
            Some((field, path)) => (path.join(HOP_DELIMITER), field),
            None => (String::new(), self.field.as_str()),
        }
    }
}

/// Sort direction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Pagination parameters.
///
/// By default limit and offset count distinct root entities. With `raw` set
/// they count rows of the joined result instead.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Pagination {
    /// Maximum number of results to return.
    pub limit: Option<u32>,
    /// Number of results to skip.
    pub offset: u32,
    /// Limit the raw joined row stream instead of root entities.
    pub raw: bool,
}

impl Pagination {
    /// Create pagination with limit and offset.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset,
            raw: false,
        }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: u32) -> Self {
        Self::new(limit, 0)
    }

    /// Create pagination with just an offset.
    pub fn offset(offset: u32) -> Self {
        Self {
            limit: None,
            offset,
            raw: false,
        }
    }

    /// Apply the bounds to the raw joined row stream.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Whether this pagination restricts anything.
    pub fn is_bounded(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }

    /// Whether this pagination bounds raw joined rows.
    pub fn limits_raw_rows(&self) -> bool {
        self.raw && self.is_bounded()
    }
}
