//! Point ↔ subscription matching.
//!
//! The rules are narrower than a subscriber would probably expect and are
//! kept exactly as clients currently observe them:
//!
//! - every clause of a subscription must hold (AND, not OR), so clauses
//!   naming different measurements can never match one point;
//! - a clause tag is only ever compared with the point's **first** tag pair,
//!   so at most one clause tag can be satisfied.

use crate::point::Point;
use crate::subscription::{Clause, SubscriptionState};

/// Whether `point` is delivered to a connection holding `state`
pub fn matches(point: &Point, state: &SubscriptionState) -> bool {
    match state {
        SubscriptionState::Subscribed(clauses) if !clauses.is_empty() => {
            clauses.iter().all(|clause| clause_matches(point, clause))
        }
        _ => false,
    }
}

/// Whether `point` satisfies a single clause
pub fn clause_matches(point: &Point, clause: &Clause) -> bool {
    if clause.measurement != point.measurement {
        return false;
    }

    let first = point.tag_pairs.first();
    let matched = clause
        .tags
        .iter()
        .filter(|tag| first == Some(*tag))
        .count();

    matched == clause.tags.len()
}
