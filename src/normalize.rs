//! Clause normalization.
//!
//! Walks the nested logical structure of a `:where` tree and flattens it
//! into tagged clauses. Each clause carries a tag: the path of logical
//! scopes from the root conjunction down to the scope that produced it.
//! Tags drive both clause ordering and the choice of combine operator
//! during unification.
//!
//! Constant arguments of predicate and rule invocations are hoisted into
//! synthetic input variables here, so downstream stages only ever deal
//! with variables.

use crate::ast::{Clause, FnArg, PredicateOp, Variable};
use crate::plan::InputBinding;
use crate::value::Value;
use crate::Eid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

// ============================================================================
// Context tags
// ============================================================================

/// How relations originating from a scope combine with their siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MergeMethod {
    Conjunction,
    Disjunction,
}

/// One step of a context tag: a logical scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagStep {
    pub method: MergeMethod,
    /// Scope id, unique within one compilation; the root conjunction is 0
    pub scope: u32,
    /// For `or-join` scopes, the variables that must survive the disjunction
    pub projection: Option<Vec<Variable>>,
}

impl TagStep {
    fn conjunction(scope: u32) -> Self {
        TagStep {
            method: MergeMethod::Conjunction,
            scope,
            projection: None,
        }
    }

    fn disjunction(scope: u32, projection: Option<Vec<Variable>>) -> Self {
        TagStep {
            method: MergeMethod::Disjunction,
            scope,
            projection,
        }
    }
}

/// An ordered path from the root scope down the tree of logical scopes.
pub type Tag = Vec<TagStep>;

/// The tag of the root conjunction.
pub fn root_tag() -> Tag {
    vec![TagStep::conjunction(0)]
}

/// Length of the longest common prefix of two tags.
pub fn shared_prefix_len(a: &[TagStep], b: &[TagStep]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Whether `prefix` is a (non-strict) prefix of `tag`.
pub fn is_prefix(prefix: &[TagStep], tag: &[TagStep]) -> bool {
    prefix.len() <= tag.len() && shared_prefix_len(prefix, tag) == prefix.len()
}

/// Whether the suffix of `tag` below `from` descends through a disjunction.
pub fn suffix_has_disjunction(tag: &[TagStep], from: usize) -> bool {
    tag[from.min(tag.len())..]
        .iter()
        .any(|step| step.method == MergeMethod::Disjunction)
}

// ============================================================================
// Normalized clauses
// ============================================================================

/// The payload of a flattened clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlatClause {
    Lookup(Eid, String, Variable),
    Entity(Eid, Variable, Variable),
    HasAttr(Variable, String, Variable),
    Filter(Variable, String, Value),
    /// Predicate with fully substituted (all-variable) arguments
    PredExpr(PredicateOp, Vec<Variable>),
    /// Rule invocation with fully substituted (all-variable) arguments
    RuleExpr(String, Vec<Variable>),
}

/// A tagged, flattened clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedClause {
    /// Unique within one compilation
    pub id: u32,
    pub tag: Tag,
    pub body: FlatClause,
    /// Variables referenced by the clause, in order of first occurrence
    pub symbols: Vec<Variable>,
    pub negated: bool,
    /// Variables that must be bound before this clause can be introduced
    pub deps: BTreeSet<Variable>,
}

impl NormalizedClause {
    /// Whether this clause is a built-in predicate
    pub fn is_predicate(&self) -> bool {
        matches!(self.body, FlatClause::PredExpr(_, _))
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Ordered mapping from variable to input binding: external `:in`
/// parameters first, then constants hoisted out of the query.
#[derive(Debug, Clone, Default)]
pub struct InputTable {
    entries: Vec<(Variable, InputBinding)>,
    hoisted: u32,
}

impl InputTable {
    pub fn new() -> Self {
        InputTable::default()
    }

    /// Register an externally bound parameter at the given `:in` position
    pub fn push_external(&mut self, var: Variable, index: usize) {
        self.entries.push((var, InputBinding::Input(index)));
    }

    /// Hoist a constant into a fresh synthetic input variable
    pub fn hoist(&mut self, value: Value) -> Variable {
        let var = Variable::synthetic(self.hoisted);
        self.hoisted += 1;
        self.entries.push((var.clone(), InputBinding::Const(value)));
        var
    }

    /// Whether the variable is input-bound
    pub fn is_input(&self, var: &Variable) -> bool {
        self.entries.iter().any(|(v, _)| v == var)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Variable, InputBinding)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<(Variable, InputBinding)> {
        self.entries
    }
}

// ============================================================================
// Normalizer
// ============================================================================

/// Monotone id allocator, compilation-local.
#[derive(Debug, Default)]
struct IdGen {
    next: u32,
}

impl IdGen {
    fn fresh(&mut self) -> u32 {
        self.next += 1;
        self.next
    }
}

/// Flattens a `:where` tree into tagged clauses and hoisted inputs.
#[derive(Debug)]
pub struct Normalizer {
    scopes: IdGen,
    clause_ids: IdGen,
    inputs: InputTable,
    clauses: Vec<NormalizedClause>,
    tag: Tag,
}

impl Normalizer {
    /// Create a normalizer; `inputs` carries any externally bound parameters
    pub fn new(inputs: InputTable) -> Self {
        Normalizer {
            scopes: IdGen::default(),
            clause_ids: IdGen::default(),
            inputs,
            clauses: Vec::new(),
            tag: root_tag(),
        }
    }

    /// Normalize a clause tree into `(inputs, clauses)`
    pub fn normalize(mut self, clauses: &[Clause]) -> (InputTable, Vec<NormalizedClause>) {
        for clause in clauses {
            self.walk(clause);
        }
        debug!(
            clauses = self.clauses.len(),
            inputs = self.inputs.len(),
            "normalized where tree"
        );
        (self.inputs, self.clauses)
    }

    fn walk(&mut self, clause: &Clause) {
        match clause {
            Clause::And(children) => {
                let scope = self.scopes.fresh();
                self.push_scope(TagStep::conjunction(scope));
                for child in children {
                    self.walk(child);
                }
                self.pop_scope();
            }
            Clause::Or(children) => self.walk_disjunction(None, children),
            Clause::OrJoin(projection, children) => {
                self.walk_disjunction(Some(projection.clone()), children);
            }
            Clause::Not(children) => {
                let scope = self.scopes.fresh();
                self.push_scope(TagStep::conjunction(scope));
                let mark = self.clauses.len();
                for child in children {
                    self.walk(child);
                }
                // A negated clause introduces no new bindings: everything it
                // mentions must be bound by a positive partner.
                for negated in &mut self.clauses[mark..] {
                    negated.negated = true;
                    negated.deps = negated.symbols.iter().cloned().collect();
                }
                self.pop_scope();
            }
            Clause::Lookup(e, attr, v) => {
                self.emit(
                    FlatClause::Lookup(*e, attr.clone(), v.clone()),
                    vec![v.clone()],
                );
            }
            Clause::Entity(e, a, v) => {
                self.emit(
                    FlatClause::Entity(*e, a.clone(), v.clone()),
                    dedup(vec![a.clone(), v.clone()]),
                );
            }
            Clause::HasAttr(e, attr, v) => {
                self.emit(
                    FlatClause::HasAttr(e.clone(), attr.clone(), v.clone()),
                    dedup(vec![e.clone(), v.clone()]),
                );
            }
            Clause::Filter(e, attr, value) => {
                self.emit(
                    FlatClause::Filter(e.clone(), attr.clone(), value.clone()),
                    vec![e.clone()],
                );
            }
            Clause::PredExpr(op, args) => {
                let args = self.substitute(args);
                let symbols = dedup(args.clone());
                let deps = symbols.iter().cloned().collect();
                self.emit_with_deps(FlatClause::PredExpr(*op, args), symbols, deps);
            }
            Clause::RuleExpr(name, args) => {
                let args = self.substitute(args);
                let symbols = dedup(args.clone());
                let deps = symbols.iter().cloned().collect();
                self.emit_with_deps(FlatClause::RuleExpr(name.clone(), args), symbols, deps);
            }
        }
    }

    /// Walk a disjunction. Every branch gets its own conjunction scope, so
    /// sibling branches stay distinguishable during unification; explicit
    /// `and` branches already carry one.
    fn walk_disjunction(&mut self, projection: Option<Vec<Variable>>, children: &[Clause]) {
        let scope = self.scopes.fresh();
        self.push_scope(TagStep::disjunction(scope, projection));
        for child in children {
            if matches!(child, Clause::And(_)) {
                self.walk(child);
            } else {
                let branch = self.scopes.fresh();
                self.push_scope(TagStep::conjunction(branch));
                self.walk(child);
                self.pop_scope();
            }
        }
        self.pop_scope();
    }

    /// Replace constant arguments with fresh synthetic input variables
    fn substitute(&mut self, args: &[FnArg]) -> Vec<Variable> {
        args.iter()
            .map(|arg| match arg {
                FnArg::Var(v) => v.clone(),
                FnArg::Const(value) => self.inputs.hoist(value.clone()),
            })
            .collect()
    }

    fn emit(&mut self, body: FlatClause, symbols: Vec<Variable>) {
        self.emit_with_deps(body, symbols, BTreeSet::new());
    }

    fn emit_with_deps(
        &mut self,
        body: FlatClause,
        symbols: Vec<Variable>,
        deps: BTreeSet<Variable>,
    ) {
        let clause = NormalizedClause {
            id: self.clause_ids.fresh(),
            tag: self.tag.clone(),
            body,
            symbols,
            negated: false,
            deps,
        };
        debug!(id = clause.id, tag = ?clause.tag, "emitting clause");
        self.clauses.push(clause);
    }

    fn push_scope(&mut self, step: TagStep) {
        self.tag.push(step);
    }

    fn pop_scope(&mut self) {
        self.tag.pop();
    }
}

fn dedup(vars: Vec<Variable>) -> Vec<Variable> {
    let mut out: Vec<Variable> = Vec::with_capacity(vars.len());
    for v in vars {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
