//! Relation unification.
//!
//! The heart of the compiler. Clauses are introduced one at a time into a
//! context holding partial relations; overlapping relations combine by
//! `Join`, `Antijoin`, or `Union`, selected by the most specific logical
//! scope the two sides share. Clauses whose dependencies are not yet bound
//! are deferred and retried until the queue drains or stabilizes.
//!
//! Merging discipline:
//!
//! - Positive relations on a purely conjunctive path merge eagerly as
//!   clauses arrive; joins are associative, so order is free.
//! - Anything involving a disjunction or a negation is postponed to a
//!   final settle phase. A disjunction branch may only collapse into its
//!   siblings once no other relation is still being assembled inside the
//!   same scope, and a negated group must finish joining before it meets
//!   its positive partner, because antijoins do not associate.

use crate::ast::{AggregateFn, Variable};
use crate::error::{CompileError, Result};
use crate::normalize::{
    is_prefix, shared_prefix_len, suffix_has_disjunction, FlatClause, InputTable, MergeMethod,
    NormalizedClause, Tag,
};
use crate::plan::Plan;
use crate::schema::AttributeMap;
use crate::value::Value;
use crate::Var;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

// ============================================================================
// Symbols
// ============================================================================

/// Assigns each variable a positional id, in registration order.
#[derive(Debug, Default)]
pub struct SymbolTable {
    ids: HashMap<Variable, Var>,
    order: Vec<Variable>,
}

impl SymbolTable {
    /// Register a variable, returning its position
    pub fn intern(&mut self, var: &Variable) -> Var {
        if let Some(&id) = self.ids.get(var) {
            return id;
        }
        let id = self.order.len() as Var;
        self.ids.insert(var.clone(), id);
        self.order.push(var.clone());
        id
    }

    /// Look up a registered variable
    pub fn get(&self, var: &Variable) -> Option<Var> {
        self.ids.get(var).copied()
    }

    /// Look up a registered variable, failing if it was never introduced
    pub fn resolve(&self, var: &Variable) -> Result<Var> {
        self.get(var)
            .ok_or_else(|| CompileError::UnknownSymbol(var.clone()))
    }

    /// Resolve a sequence of variables to their positions
    pub fn resolve_all(&self, vars: &[Variable]) -> Result<Vec<Var>> {
        vars.iter().map(|v| self.resolve(v)).collect()
    }

    /// Number of registered variables
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no variable was registered yet
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ============================================================================
// Relations
// ============================================================================

/// A partial plan covering some variables, produced by one or more clauses
/// of a logical scope.
#[derive(Debug, Clone)]
pub struct Relation {
    /// The most specific scope all contributing clauses share
    pub tag: Tag,
    /// Variables bound by the plan, duplicate-free, in binding order
    pub symbols: Vec<Variable>,
    pub negated: bool,
    pub deps: BTreeSet<Variable>,
    pub plan: Plan,
    /// Set once the relation's plan has been copied into disjunction
    /// branches; consumed relations drop out at settling
    pub(crate) consumed: bool,
}

impl Relation {
    fn binds(&self, var: &Variable) -> bool {
        self.symbols.contains(var)
    }

    fn binds_all<'a>(&self, vars: impl IntoIterator<Item = &'a Variable>) -> bool {
        vars.into_iter().all(|v| self.binds(v))
    }

    fn shares_symbol(&self, other: &Relation) -> bool {
        self.symbols.iter().any(|v| other.binds(v))
    }
}

enum Introduced {
    Done,
    Defer,
}

// ============================================================================
// Unification context
// ============================================================================

/// Evolving state of one unification: symbol table, inputs, and the set of
/// partial relations. Grows monotonically except for relations, which are
/// rebuilt as they combine.
#[derive(Debug)]
pub struct UnificationContext<'a> {
    pub symbols: SymbolTable,
    inputs: InputTable,
    attributes: &'a AttributeMap,
    /// Rule head variables; bound by the caller of the rule
    params: BTreeSet<Variable>,
    relations: Vec<Relation>,
}

impl<'a> UnificationContext<'a> {
    /// Context for a query compilation
    pub fn new(attributes: &'a AttributeMap, inputs: InputTable) -> Self {
        Self::with_parameters(attributes, inputs, &[])
    }

    /// Context for a rule compilation, seeded with the head variables
    pub fn with_parameters(
        attributes: &'a AttributeMap,
        inputs: InputTable,
        params: &[Variable],
    ) -> Self {
        let mut symbols = SymbolTable::default();
        for var in params {
            symbols.intern(var);
        }
        for (var, _) in inputs.iter() {
            symbols.intern(var);
        }
        UnificationContext {
            symbols,
            inputs,
            attributes,
            params: params.iter().cloned().collect(),
            relations: Vec::new(),
        }
    }

    /// Resolve a variable to its position
    pub fn resolve(&self, var: &Variable) -> Result<Var> {
        self.symbols.resolve(var)
    }

    /// Resolve a sequence of variables to positions
    pub fn resolve_all(&self, vars: &[Variable]) -> Result<Vec<Var>> {
        self.symbols.resolve_all(vars)
    }

    /// Hoist a constant into a fresh synthetic input variable
    pub fn hoist_constant(&mut self, value: Value) -> Variable {
        let var = self.inputs.hoist(value);
        self.symbols.intern(&var);
        var
    }

    /// Whether the variable is bound externally or by hoisting
    pub fn is_input(&self, var: &Variable) -> bool {
        self.inputs.is_input(var)
    }

    /// The relations still alive in this context
    pub fn live_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(|r| !r.consumed)
    }

    /// Surrender the accumulated input table
    pub fn into_inputs(self) -> InputTable {
        self.inputs
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Introduce all clauses, deferring and retrying as bindings appear,
    /// then settle disjunctions and negations.
    pub fn unify(&mut self, clauses: Vec<NormalizedClause>) -> Result<()> {
        let mut pending = clauses;
        loop {
            let mut deferred = Vec::new();
            let mut progress = false;

            for clause in pending {
                if !self.deps_bound(&clause) {
                    debug!(id = clause.id, "deferring clause with unbound deps");
                    deferred.push(clause);
                    continue;
                }
                match self.introduce(&clause)? {
                    Introduced::Done => progress = true,
                    Introduced::Defer => {
                        debug!(id = clause.id, "deferring clause without a unique target");
                        deferred.push(clause);
                    }
                }
            }

            if deferred.is_empty() {
                break;
            }
            if !progress {
                return Err(self.stabilized(&deferred));
            }
            pending = deferred;
        }
        self.settle()
    }

    fn deps_bound(&self, clause: &NormalizedClause) -> bool {
        clause.deps.iter().all(|v| {
            self.inputs.is_input(v)
                || self.params.contains(v)
                || self.relations.iter().any(|r| !r.consumed && r.binds(v))
        })
    }

    /// The deferred queue stabilized: report why.
    fn stabilized(&self, deferred: &[NormalizedClause]) -> CompileError {
        for clause in deferred {
            if clause.is_predicate() && self.deps_bound(clause) {
                return CompileError::PredicateUnbound {
                    clause: clause.id,
                    symbols: clause.symbols.clone(),
                };
            }
        }
        let mut unbound = Vec::new();
        for clause in deferred {
            for dep in &clause.deps {
                if !self.deps_bound_var(dep) && !unbound.contains(dep) {
                    unbound.push(dep.clone());
                }
            }
        }
        CompileError::UnintroducableClauses {
            clauses: deferred.iter().map(|c| c.id).collect(),
            symbols: unbound,
        }
    }

    fn deps_bound_var(&self, var: &Variable) -> bool {
        self.inputs.is_input(var)
            || self.params.contains(var)
            || self.relations.iter().any(|r| !r.consumed && r.binds(var))
    }

    // ------------------------------------------------------------------
    // Introduction
    // ------------------------------------------------------------------

    fn introduce(&mut self, clause: &NormalizedClause) -> Result<Introduced> {
        for var in &clause.symbols {
            self.symbols.intern(var);
        }
        debug!(id = clause.id, "introducing clause");

        if clause.is_predicate() {
            self.introduce_predicate(clause)
        } else {
            self.introduce_pattern(clause)?;
            Ok(Introduced::Done)
        }
    }

    /// Build a seed relation from the clause and fold it into every
    /// eagerly combinable conflicting relation, most specific scope first.
    fn introduce_pattern(&mut self, clause: &NormalizedClause) -> Result<()> {
        let mut acc = self.seed_relation(clause)?;

        loop {
            let mut best: Option<(usize, usize)> = None;
            for (i, rel) in self.relations.iter().enumerate() {
                if rel.consumed || !rel.shares_symbol(&acc) {
                    continue;
                }
                if rel.negated || acc.negated {
                    continue;
                }
                let prefix = shared_prefix_len(&rel.tag, &acc.tag);
                if rel.tag[prefix - 1].method == MergeMethod::Disjunction {
                    continue;
                }
                if suffix_has_disjunction(&rel.tag, prefix)
                    || suffix_has_disjunction(&acc.tag, prefix)
                {
                    continue;
                }
                if best.map_or(true, |(_, bp)| prefix > bp) {
                    best = Some((i, prefix));
                }
            }

            match best {
                Some((i, _)) => {
                    let rel = self.relations.remove(i);
                    acc = self.combine(rel, acc)?;
                }
                None => break,
            }
        }

        self.relations.push(acc);
        Ok(())
    }

    fn seed_relation(&mut self, clause: &NormalizedClause) -> Result<Relation> {
        let plan = match &clause.body {
            FlatClause::Lookup(e, attr, v) => {
                Plan::Lookup(*e, self.attributes.resolve(attr)?, self.resolve(v)?)
            }
            FlatClause::Entity(e, a, v) => Plan::Entity(*e, self.resolve(a)?, self.resolve(v)?),
            FlatClause::HasAttr(e, attr, v) => Plan::HasAttr(
                self.resolve(e)?,
                self.attributes.resolve(attr)?,
                self.resolve(v)?,
            ),
            FlatClause::Filter(e, attr, value) => Plan::Filter(
                self.resolve(e)?,
                self.attributes.resolve(attr)?,
                value.clone(),
            ),
            FlatClause::RuleExpr(name, args) => {
                Plan::RuleExpr(name.clone(), self.resolve_all(args)?)
            }
            FlatClause::PredExpr(..) => unreachable!("predicates do not produce seed relations"),
        };

        let symbols = clause
            .symbols
            .iter()
            .filter(|v| !self.inputs.is_input(v))
            .cloned()
            .collect();

        Ok(Relation {
            tag: clause.tag.clone(),
            symbols,
            negated: clause.negated,
            deps: clause.deps.clone(),
            plan,
            consumed: false,
        })
    }

    /// Predicates produce no relations: they wrap the unique relation
    /// binding their operands. A predicate whose scope sits deeper than its
    /// target wraps a copy per branch and consumes the original.
    fn introduce_predicate(&mut self, clause: &NormalizedClause) -> Result<Introduced> {
        let FlatClause::PredExpr(op, args) = &clause.body else {
            unreachable!("introduce_predicate requires a predicate clause");
        };

        let needed: Vec<&Variable> = clause
            .symbols
            .iter()
            .filter(|v| !self.inputs.is_input(v) && !self.params.contains(v))
            .collect();
        if needed.is_empty() {
            return Err(CompileError::PredicateUnbound {
                clause: clause.id,
                symbols: clause.symbols.clone(),
            });
        }

        let mut candidates: Vec<(usize, bool)> = Vec::new();
        for (i, rel) in self.relations.iter().enumerate() {
            if rel.negated != clause.negated || !rel.binds_all(needed.iter().copied()) {
                continue;
            }
            let prefix = shared_prefix_len(&rel.tag, &clause.tag);
            let conjunctive = rel.tag[prefix - 1].method == MergeMethod::Conjunction
                && !suffix_has_disjunction(&rel.tag, prefix)
                && !suffix_has_disjunction(&clause.tag, prefix);
            if conjunctive {
                candidates.push((i, true));
            } else if is_prefix(&rel.tag, &clause.tag) {
                candidates.push((i, false));
            }
        }

        if candidates.len() != 1 {
            // Zero or ambiguous targets may still resolve once later
            // clauses merge relations; the driver decides when to give up.
            return Ok(Introduced::Defer);
        }

        let (idx, in_place) = candidates[0];
        let positions = self.resolve_all(args)?;

        if in_place {
            let rel = &mut self.relations[idx];
            rel.plan = Plan::PredExpr(*op, positions, Box::new(rel.plan.clone()));
            rel.deps.extend(clause.deps.iter().cloned());
            debug!(id = clause.id, "wrapped predicate in place");
        } else {
            let target = &self.relations[idx];
            let branch = Relation {
                tag: clause.tag.clone(),
                symbols: clause
                    .symbols
                    .iter()
                    .filter(|v| !self.inputs.is_input(v))
                    .cloned()
                    .collect(),
                negated: clause.negated,
                deps: {
                    let mut deps = target.deps.clone();
                    deps.extend(clause.deps.iter().cloned());
                    deps
                },
                plan: Plan::PredExpr(*op, positions, Box::new(target.plan.clone())),
                consumed: false,
            };
            self.relations[idx].consumed = true;
            self.relations.push(branch);
            debug!(id = clause.id, "wrapped predicate into a branch copy");
        }

        Ok(Introduced::Done)
    }

    // ------------------------------------------------------------------
    // Settling
    // ------------------------------------------------------------------

    /// Combine the remaining relations: disjunction branches union once
    /// their scope is fully assembled, negated groups join and then
    /// antijoin their positive partners.
    fn settle(&mut self) -> Result<()> {
        let before = self.relations.len();
        self.relations.retain(|r| !r.consumed);
        if self.relations.len() < before {
            debug!(
                dropped = before - self.relations.len(),
                "dropped consumed relations"
            );
        }

        loop {
            let mut best: Option<(usize, usize, usize, bool)> = None;
            for i in 0..self.relations.len() {
                for j in (i + 1)..self.relations.len() {
                    let (a, b) = (&self.relations[i], &self.relations[j]);
                    if !a.shares_symbol(b) {
                        continue;
                    }
                    let prefix = shared_prefix_len(&a.tag, &b.tag);
                    if !self.may_collapse(i, prefix) || !self.may_collapse(j, prefix) {
                        continue;
                    }
                    // A side sitting exactly at the shared scope is the
                    // scope's accumulated relation; merging into it first
                    // keeps a disjunction growing one union, not several.
                    let anchored = a.tag.len() == prefix || b.tag.len() == prefix;
                    let better = match best {
                        None => true,
                        Some((_, _, bp, banchored)) => {
                            prefix > bp || (prefix == bp && anchored && !banchored)
                        }
                    };
                    if better {
                        best = Some((i, j, prefix, anchored));
                    }
                }
            }

            match best {
                Some((i, j, _, _)) => {
                    let right = self.relations.remove(j);
                    let left = self.relations.remove(i);
                    let combined = self.combine(left, right)?;
                    self.relations.push(combined);
                }
                None => return Ok(()),
            }
        }
    }

    /// A relation may collapse to the given depth only if every
    /// disjunction scope it passes on the way up has no other relation
    /// still assembling inside it.
    fn may_collapse(&self, idx: usize, from: usize) -> bool {
        let rel = &self.relations[idx];
        for k in from..rel.tag.len() {
            if rel.tag[k].method != MergeMethod::Disjunction {
                continue;
            }
            let scope = &rel.tag[..=k];
            for (j, other) in self.relations.iter().enumerate() {
                if j == idx || other.consumed {
                    continue;
                }
                if is_prefix(scope, &other.tag) {
                    return false;
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Combine operators
    // ------------------------------------------------------------------

    fn combine(&mut self, left: Relation, right: Relation) -> Result<Relation> {
        let prefix = shared_prefix_len(&left.tag, &right.tag);
        match left.tag[prefix - 1].method {
            MergeMethod::Conjunction => match (left.negated, right.negated) {
                (false, true) => self.antijoin(left, right),
                (true, false) => self.antijoin(right, left),
                _ => self.join(left, right, prefix),
            },
            MergeMethod::Disjunction => self.union(left, right, prefix),
        }
    }

    /// Equijoin on the first shared variable. Multi-key joins are a future
    /// extension of the executor interface; secondary shared variables are
    /// dropped from the result's symbol list.
    fn join(&mut self, left: Relation, right: Relation, prefix: usize) -> Result<Relation> {
        let shared: Vec<Variable> = left
            .symbols
            .iter()
            .filter(|v| right.binds(v))
            .cloned()
            .collect();
        let key = shared
            .first()
            .cloned()
            .expect("joined relations must share a variable");

        let mut symbols = vec![key.clone()];
        symbols.extend(left.symbols.iter().filter(|v| !shared.contains(v)).cloned());
        symbols.extend(right.symbols.iter().filter(|v| !shared.contains(v)).cloned());

        let mut deps = left.deps;
        deps.extend(right.deps);

        debug!(key = %key, "joining relations");
        Ok(Relation {
            tag: left.tag[..prefix].to_vec(),
            symbols,
            negated: left.negated && right.negated,
            deps,
            plan: Plan::Join(
                Box::new(left.plan),
                Box::new(right.plan),
                self.resolve(&key)?,
            ),
            consumed: false,
        })
    }

    /// Keep tuples of the positive relation without a match in the
    /// negative one; keyed on every variable the sides share, in the
    /// negative relation's order.
    fn antijoin(&mut self, positive: Relation, negative: Relation) -> Result<Relation> {
        let keys: Vec<Variable> = negative
            .symbols
            .iter()
            .filter(|v| positive.binds(v))
            .cloned()
            .collect();

        let mut symbols = keys.clone();
        symbols.extend(
            positive
                .symbols
                .iter()
                .filter(|v| !keys.contains(v))
                .cloned(),
        );

        let prefix = shared_prefix_len(&positive.tag, &negative.tag);
        let mut deps = positive.deps;
        deps.extend(negative.deps);

        debug!(keys = ?keys, "antijoining relations");
        Ok(Relation {
            tag: positive.tag[..prefix].to_vec(),
            symbols,
            negated: false,
            deps,
            plan: Plan::Antijoin(
                Box::new(positive.plan),
                Box::new(negative.plan),
                self.symbols.resolve_all(&keys)?,
            ),
            consumed: false,
        })
    }

    /// Union two relations of one disjunction scope. Both sides must bind
    /// the scope's projection: the `or-join` projection when present, the
    /// earlier relation's symbols otherwise.
    fn union(&mut self, left: Relation, right: Relation, prefix: usize) -> Result<Relation> {
        if left.negated || right.negated {
            let negated = if left.negated { &left } else { &right };
            return Err(CompileError::UnboundNot {
                symbols: negated.symbols.clone(),
            });
        }

        let step = &left.tag[prefix - 1];
        let projection = step
            .projection
            .clone()
            .unwrap_or_else(|| left.symbols.clone());

        for side in [&left, &right] {
            if !side.binds_all(&projection) {
                return Err(CompileError::UnionIncompatible {
                    projection,
                    symbols: side.symbols.clone(),
                });
            }
        }

        let positions = self.symbols.resolve_all(&projection)?;
        let left_is_union = matches!(&left.plan, Plan::Union(pos, _) if *pos == positions);
        let right_is_union = matches!(&right.plan, Plan::Union(pos, _) if *pos == positions);

        let plan = match (left_is_union, right_is_union) {
            (true, true) => return Err(CompileError::UnionOfUnions),
            (true, false) => {
                let Plan::Union(pos, mut children) = left.plan else {
                    unreachable!("checked above");
                };
                children.push(right.plan);
                Plan::Union(pos, children)
            }
            (false, true) => {
                let Plan::Union(pos, mut children) = right.plan else {
                    unreachable!("checked above");
                };
                children.push(left.plan);
                Plan::Union(pos, children)
            }
            (false, false) => Plan::Union(positions, vec![left.plan, right.plan]),
        };

        let mut deps = left.deps;
        deps.extend(right.deps);

        debug!(projection = ?projection, "unioning relations");
        Ok(Relation {
            tag: left.tag[..prefix].to_vec(),
            symbols: projection,
            negated: false,
            deps,
            plan,
            consumed: false,
        })
    }

    // ------------------------------------------------------------------
    // Resolution hooks for the find and rule stages
    // ------------------------------------------------------------------

    /// Replace the unique relation binding the aggregate's arguments with
    /// the aggregation over it.
    pub fn apply_aggregate(&mut self, function: AggregateFn, args: &[Variable]) -> Result<()> {
        let needed: Vec<&Variable> = args
            .iter()
            .filter(|v| !self.inputs.is_input(v) && !self.params.contains(v))
            .collect();

        let mut candidates = Vec::new();
        for (i, rel) in self.relations.iter().enumerate() {
            if !rel.consumed && !needed.is_empty() && rel.binds_all(needed.iter().copied()) {
                candidates.push(i);
            }
        }
        if candidates.len() != 1 {
            return Err(CompileError::AggregateUnbound {
                symbols: args.to_vec(),
            });
        }

        let positions = self.resolve_all(args)?;
        let rel = &mut self.relations[candidates[0]];
        rel.plan = Plan::Aggregate(function, Box::new(rel.plan.clone()), positions);
        Ok(())
    }

    /// Remove and return the single relation binding all required
    /// variables. Any other surviving relation carries constraints the
    /// plan cannot express and is dropped with a warning.
    pub fn answer_relation(&mut self, required: &[Variable]) -> Result<Relation> {
        let idx = self
            .relations
            .iter()
            .position(|r| !r.consumed && r.binds_all(required));

        let Some(idx) = idx else {
            let mut unbound: Vec<Variable> = required
                .iter()
                .filter(|v| !self.relations.iter().any(|r| !r.consumed && r.binds(v)))
                .cloned()
                .collect();
            if unbound.is_empty() {
                unbound = required.to_vec();
            }
            return Err(CompileError::FindUnbound { symbols: unbound });
        };

        let answer = self.relations.remove(idx);
        for leftover in self.relations.iter().filter(|r| !r.consumed) {
            warn!(symbols = ?leftover.symbols, "dropping relation unconnected to the answer");
        }
        Ok(answer)
    }
}
