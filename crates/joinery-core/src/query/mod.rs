//! Relation loading.
//!
//! Path strings are resolved into a [`RelationTree`], the tree is planned
//! into a [`JoinPlan`] or per-level [`FetchStatement`]s, and backend rows are
//! turned back into linked [`Instance`]s. [`Loader`] drives the whole
//! sequence.

mod instance;
mod loader;
mod pagination;
mod path;
mod planner;
mod prefetch;
mod reassemble;

pub use instance::{Instance, InstanceRef, RelationValue};
pub use loader::{Loader, QuerySet};
pub use pagination::{apply_limit, apply_pagination, check_query};
pub use path::{resolve, PathResolver, RelationNode, RelationTree};
pub use planner::{
    ColumnRef, FetchLink, FetchStatement, JoinKind, JoinPlan, JoinPlanner, JoinStep, LimitClause,
    PlanNode, PlanOrder, Statement, ThroughStep,
};
pub use prefetch::PrefetchExecutor;
pub use reassemble::{reassemble, Materialization};
