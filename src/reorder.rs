//! Clause ordering.
//!
//! Sorts normalized clauses so that binding-producing clauses of a scope
//! surface ahead of the deeper scopes that constrain them: tags compare
//! lexicographically, which places a scope's own clauses before any clause
//! of its sub-scopes, and groups sibling scopes into contiguous runs.
//! Within one scope, ties break on the clause id reversed; the tie-break
//! carries no semantics beyond making evaluation order deterministic.

use crate::normalize::NormalizedClause;

/// Order clauses for unification.
pub fn reorder(clauses: &mut [NormalizedClause]) {
    clauses.sort_by(|a, b| a.tag.cmp(&b.tag).then_with(|| b.id.cmp(&a.id)));
}
