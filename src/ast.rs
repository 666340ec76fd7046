//! Query AST.
//!
//! Typed representation of parsed queries and rule definitions, produced by
//! the grammar validator and consumed by the normalizer. Trees are built
//! once and never mutated afterwards.

use crate::value::Value;
use crate::Eid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Variables and function arguments
// ============================================================================

/// A logic variable, identified syntactically by a leading `?`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variable(pub String);

impl Variable {
    /// Create a variable from its source spelling (including the `?`)
    pub fn new(name: impl Into<String>) -> Self {
        Variable(name.into())
    }

    /// Create the k-th synthetic input variable (`?in_k`)
    pub fn synthetic(k: u32) -> Self {
        Variable(format!("?in_{k}"))
    }

    /// The source spelling of the variable
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Argument to a predicate, aggregate, or rule invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FnArg {
    /// A variable reference
    Var(Variable),
    /// A constant literal
    Const(Value),
}

impl FnArg {
    /// Get the variable if this argument is one
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            FnArg::Var(v) => Some(v),
            FnArg::Const(_) => None,
        }
    }

    /// Check if this argument is a constant
    pub fn is_const(&self) -> bool {
        matches!(self, FnArg::Const(_))
    }
}

// ============================================================================
// Predicates and aggregates
// ============================================================================

/// Built-in comparison predicates.
///
/// The serialized operator names are part of the plan contract consumed by
/// the executor; do not rename them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PredicateOp {
    #[serde(rename = "LT")]
    Lt,
    #[serde(rename = "LTE")]
    Lte,
    #[serde(rename = "GT")]
    Gt,
    #[serde(rename = "GTE")]
    Gte,
    #[serde(rename = "EQ")]
    Eq,
    #[serde(rename = "NEQ")]
    Neq,
}

impl PredicateOp {
    /// Parse a predicate symbol as written in queries
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(PredicateOp::Lt),
            "<=" => Some(PredicateOp::Lte),
            ">" => Some(PredicateOp::Gt),
            ">=" => Some(PredicateOp::Gte),
            "=" => Some(PredicateOp::Eq),
            "!=" | "not=" => Some(PredicateOp::Neq),
            _ => None,
        }
    }

    /// The encoded operator name used in plans
    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateOp::Lt => "LT",
            PredicateOp::Lte => "LTE",
            PredicateOp::Gt => "GT",
            PredicateOp::Gte => "GTE",
            PredicateOp::Eq => "EQ",
            PredicateOp::Neq => "NEQ",
        }
    }
}

/// Aggregation functions recognized in find specifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregateFn {
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "avg")]
    Avg,
}

impl AggregateFn {
    /// Parse an aggregate function name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            "count" => Some(AggregateFn::Count),
            "sum" => Some(AggregateFn::Sum),
            "avg" => Some(AggregateFn::Avg),
            _ => None,
        }
    }

    /// The aggregate name used in plans
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
        }
    }
}

// ============================================================================
// Clauses
// ============================================================================

/// One parsed clause of a `:where` specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clause {
    /// `[eid :attr ?v]` — look up one attribute of a known entity
    Lookup(Eid, String, Variable),
    /// `[eid ?a ?v]` — enumerate attribute/value pairs of a known entity
    Entity(Eid, Variable, Variable),
    /// `[?e :attr ?v]` — all entities carrying the attribute
    HasAttr(Variable, String, Variable),
    /// `[?e :attr const]` — entities whose attribute has the given value
    Filter(Variable, String, Value),
    /// `[(op fn-arg fn-arg)]` — built-in comparison predicate
    PredExpr(PredicateOp, Vec<FnArg>),
    /// `(name fn-arg ...)` — rule invocation
    RuleExpr(String, Vec<FnArg>),
    /// `(and clause ...)`
    And(Vec<Clause>),
    /// `(or clause ...)`
    Or(Vec<Clause>),
    /// `(or-join [?var ...] clause ...)` — disjunction with an explicit projection
    OrJoin(Vec<Variable>, Vec<Clause>),
    /// `(not clause ...)`
    Not(Vec<Clause>),
}

impl Clause {
    /// Check if this clause is a leaf (introduces no nested scope)
    pub fn is_leaf(&self) -> bool {
        !matches!(
            self,
            Clause::And(_) | Clause::Or(_) | Clause::OrJoin(_, _) | Clause::Not(_)
        )
    }

    /// All variables mentioned by this clause, including nested ones
    pub fn variables(&self) -> HashSet<Variable> {
        let mut vars = HashSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut HashSet<Variable>) {
        match self {
            Clause::Lookup(_, _, v) => {
                vars.insert(v.clone());
            }
            Clause::Entity(_, a, v) => {
                vars.insert(a.clone());
                vars.insert(v.clone());
            }
            Clause::HasAttr(e, _, v) => {
                vars.insert(e.clone());
                vars.insert(v.clone());
            }
            Clause::Filter(e, _, _) => {
                vars.insert(e.clone());
            }
            Clause::PredExpr(_, args) | Clause::RuleExpr(_, args) => {
                for arg in args {
                    if let FnArg::Var(v) = arg {
                        vars.insert(v.clone());
                    }
                }
            }
            Clause::And(children) | Clause::Or(children) | Clause::Not(children) => {
                for child in children {
                    child.collect_variables(vars);
                }
            }
            Clause::OrJoin(projection, children) => {
                vars.extend(projection.iter().cloned());
                for child in children {
                    child.collect_variables(vars);
                }
            }
        }
    }
}

// ============================================================================
// Queries and rules
// ============================================================================

/// One element of a find specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindElement {
    /// A plain variable
    Var(Variable),
    /// An aggregate call over fn-args
    Aggregate(AggregateCall),
}

/// An aggregate call `(f fn-arg ...)` in a find specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCall {
    pub function: AggregateFn,
    pub args: Vec<FnArg>,
}

/// A validated query: find spec, externally bound inputs, where clauses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub find: Vec<FindElement>,
    /// Variables bound externally, index-assigned in declaration order
    pub inputs: Vec<Variable>,
    pub where_clauses: Vec<Clause>,
}

/// A single rule definition `[(name ?var ...) clause ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub head: Vec<Variable>,
    pub body: Vec<Clause>,
}

impl RuleDefinition {
    /// The arity of the rule head
    pub fn arity(&self) -> usize {
        self.head.len()
    }
}
