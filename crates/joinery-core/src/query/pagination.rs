//! Limit/offset placement.
//!
//! By default pagination counts distinct root entities: the backend narrows
//! the root keys first and expands the joins afterwards. Raw mode counts rows
//! of the joined stream instead, so a fan-out join can return fewer roots
//! than the limit, some of them with only part of their children.

use crate::error::Error;
use joinery_proto::{LoadQuery, Pagination};

use super::planner::{JoinPlan, LimitClause};

/// Place limit and offset on a join plan.
pub fn apply_limit(plan: &mut JoinPlan, limit: Option<u32>, offset: u32, raw: bool) {
    plan.limit = if limit.is_none() && offset == 0 {
        LimitClause::None
    } else if raw {
        LimitClause::Raw { limit, offset }
    } else {
        LimitClause::Root { limit, offset }
    };
}

/// Place a query's pagination on a join plan.
pub fn apply_pagination(plan: &mut JoinPlan, pagination: Option<&Pagination>) {
    match pagination {
        Some(p) => apply_limit(plan, p.limit, p.offset, p.raw),
        None => plan.limit = LimitClause::None,
    }
}

/// Reject raw-row pagination on a query that also prefetches.
///
/// Raw mode bounds the rows of the single joined statement; the keyed
/// prefetch statements have no joined row stream to bound.
pub fn check_query(query: &LoadQuery, pagination: Option<&Pagination>) -> Result<(), Error> {
    let raw = pagination.is_some_and(Pagination::limits_raw_rows);
    if raw && !query.prefetch_related.is_empty() {
        return Err(Error::QueryDefinition(format!(
            "raw-row pagination cannot be combined with prefetch_related ({})",
            query.prefetch_related.join(", ")
        )));
    }
    Ok(())
}
