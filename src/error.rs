//! Compiler Error Types

use crate::ast::Variable;
use thiserror::Error;

/// Errors surfaced by the compiler. All of them are fatal to the current
/// compilation; no partial plans are ever returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Source text could not be read into a syntax tree
    #[error("read error at line {line}, column {column}: {message}")]
    Read {
        message: String,
        line: usize,
        column: usize,
    },

    /// Input does not conform to the query or rule grammar
    #[error("grammar error at {trace}: expected {expected}, found {found}")]
    Grammar {
        /// Path from the top-level form down to the offending subtree
        trace: String,
        expected: String,
        found: String,
    },

    /// Referenced attribute has no schema mapping
    #[error("unknown attribute :{0}")]
    UnknownAttribute(String),

    /// A variable was referenced before being registered (internal invariant)
    #[error("unknown symbol {0}")]
    UnknownSymbol(Variable),

    /// At least one find symbol is not bound by any single relation
    #[error("find spec contains unbound symbols: {symbols:?}")]
    FindUnbound { symbols: Vec<Variable> },

    /// Predicate operands are not all bound within one relation
    #[error("predicate inputs must be bound in a single relation: clause {clause} over {symbols:?}")]
    PredicateUnbound {
        clause: u32,
        symbols: Vec<Variable>,
    },

    /// Aggregate arguments are not bound together
    #[error("aggregate arguments must be bound in a single relation: {symbols:?}")]
    AggregateUnbound { symbols: Vec<Variable> },

    /// Relations under a disjunction do not all bind the projection
    #[error("union-incompatible relations; insert a projection: {projection:?} is not bound by {symbols:?}")]
    UnionIncompatible {
        projection: Vec<Variable>,
        symbols: Vec<Variable>,
    },

    /// A negated relation met a disjunction without a positive partner
    #[error("unbound not: negated relation over {symbols:?} under a disjunction")]
    UnboundNot { symbols: Vec<Variable> },

    /// The deferred queue stabilized without introducing these clauses
    #[error("un-introducable clauses {clauses:?} over {symbols:?}")]
    UnintroducableClauses {
        clauses: Vec<u32>,
        symbols: Vec<Variable>,
    },

    /// Two union relations met under one disjunction (internal invariant)
    #[error("cannot merge two union relations")]
    UnionOfUnions,
}

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompileError>;
