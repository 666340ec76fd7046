//! Query plan types.
//!
//! The executable output of the compiler: a tree of relational operators
//! over positional variable ids, ready for synthesis by an incremental
//! dataflow executor. Attribute keywords never survive into plans; they are
//! resolved to integer ids during unification. The node shapes and the
//! encoded predicate operator names are part of the contract with the
//! executor.

use crate::ast::{AggregateFn, PredicateOp, Variable};
use crate::value::Value;
use crate::{Aid, Eid, Var};
use serde::{Deserialize, Serialize};

/// Possible query plan types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Plan {
    /// One attribute of a known entity: (entity id, attribute id, value position)
    Lookup(Eid, Aid, Var),
    /// Attribute/value pairs of a known entity: (entity id, attribute position, value position)
    Entity(Eid, Var, Var),
    /// All entities carrying an attribute: (entity position, attribute id, value position)
    HasAttr(Var, Aid, Var),
    /// Entities whose attribute has a constant value: (entity position, attribute id, value)
    Filter(Var, Aid, Value),
    /// Equijoin on a single key position
    Join(Box<Plan>, Box<Plan>, Var),
    /// Antijoin: tuples of the left without a match in the right on the key positions
    Antijoin(Box<Plan>, Box<Plan>, Vec<Var>),
    /// Union of plans, each projected onto the given positions
    Union(Vec<Var>, Vec<Plan>),
    /// Projection onto the given positions
    Project(Box<Plan>, Vec<Var>),
    /// Aggregation over the argument positions
    Aggregate(AggregateFn, Box<Plan>, Vec<Var>),
    /// Built-in comparison over argument positions, filtering the child
    PredExpr(PredicateOp, Vec<Var>, Box<Plan>),
    /// Named rule invocation binding the argument positions
    RuleExpr(String, Vec<Var>),
}

impl Plan {
    /// The variable positions this plan binds, symbolically evaluated.
    ///
    /// Conservative with respect to the executor: joins bind both sides,
    /// unions and projections bind exactly their position lists.
    pub fn bound_variables(&self) -> Vec<Var> {
        match self {
            Plan::Lookup(_, _, v) => vec![*v],
            Plan::Entity(_, a, v) => vec![*a, *v],
            Plan::HasAttr(e, _, v) => vec![*e, *v],
            Plan::Filter(e, _, _) => vec![*e],
            Plan::Join(left, right, _) => {
                let mut vars = left.bound_variables();
                for v in right.bound_variables() {
                    if !vars.contains(&v) {
                        vars.push(v);
                    }
                }
                vars
            }
            Plan::Antijoin(left, _, _) => left.bound_variables(),
            Plan::Union(positions, _) | Plan::Project(_, positions) => positions.clone(),
            Plan::Aggregate(_, child, _) | Plan::PredExpr(_, _, child) => child.bound_variables(),
            Plan::RuleExpr(_, positions) => {
                let mut vars = Vec::new();
                for v in positions {
                    if !vars.contains(v) {
                        vars.push(*v);
                    }
                }
                vars
            }
        }
    }

    /// Visit every node of the plan tree, parents before children.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Plan)) {
        f(self);
        match self {
            Plan::Join(left, right, _) | Plan::Antijoin(left, right, _) => {
                left.visit(f);
                right.visit(f);
            }
            Plan::Union(_, children) => {
                for child in children {
                    child.visit(f);
                }
            }
            Plan::Project(child, _) | Plan::Aggregate(_, child, _) | Plan::PredExpr(_, _, child) => {
                child.visit(f);
            }
            Plan::Lookup(..) | Plan::Entity(..) | Plan::HasAttr(..) | Plan::Filter(..)
            | Plan::RuleExpr(..) => {}
        }
    }
}

/// A bound constant or external parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputBinding {
    /// A constant hoisted out of the query
    Const(Value),
    /// A parameter supplied externally, by zero-based `:in` position
    Input(usize),
}

/// Final output of a query compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub plan: Plan,
    /// Ordered mapping from variable to binding: external parameters in
    /// declaration order, then hoisted constants in hoisting order
    pub inputs: Vec<(Variable, InputBinding)>,
}

/// A named, compiled rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub plan: Plan,
}

/// Final output of a rule-set compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRuleSet {
    /// One rule per distinct head, in first-appearance order
    pub rules: Vec<Rule>,
    /// Constants hoisted out of rule bodies
    pub inputs: Vec<(Variable, InputBinding)>,
}
