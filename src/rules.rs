//! Rule compilation.
//!
//! Groups rule definitions by head, wraps multi-definition rules in a
//! disjunction projected onto the head variables, and compiles each group
//! through the same normalize/reorder/unify pipeline as queries. Rules
//! compile independently: a recursive reference stays a `RuleExpr` node
//! for the executor to tie back.

use crate::ast::{Clause, RuleDefinition, Variable};
use crate::error::{CompileError, Result};
use crate::normalize::{InputTable, Normalizer};
use crate::plan::{CompiledRuleSet, Plan, Rule};
use crate::reorder::reorder;
use crate::schema::AttributeMap;
use crate::unify::UnificationContext;
use std::collections::HashMap;
use tracing::debug;

/// Compile a rule set into one plan per distinct head.
pub fn compile_rule_set(
    definitions: &[RuleDefinition],
    attributes: &AttributeMap,
) -> Result<CompiledRuleSet> {
    check_arities(definitions)?;

    // Group by exact head, preserving first-appearance order.
    let mut groups: Vec<((String, Vec<Variable>), Vec<&RuleDefinition>)> = Vec::new();
    for def in definitions {
        let key = (def.name.clone(), def.head.clone());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, defs)) => defs.push(def),
            None => groups.push((key, vec![def])),
        }
    }

    let mut rules = Vec::new();
    let mut inputs = InputTable::new();

    for ((name, head), defs) in groups {
        let body: Vec<Clause> = if defs.len() == 1 {
            defs[0].body.clone()
        } else {
            vec![Clause::OrJoin(
                head.clone(),
                defs.iter().map(|d| Clause::And(d.body.clone())).collect(),
            )]
        };

        let (inputs_back, mut clauses) = Normalizer::new(inputs).normalize(&body);
        reorder(&mut clauses);

        let mut ctx = UnificationContext::with_parameters(attributes, inputs_back, &head);
        ctx.unify(clauses)?;

        let answer = ctx.answer_relation(&head)?;
        let plan = Plan::Project(Box::new(answer.plan), ctx.resolve_all(&head)?);
        debug!(rule = %name, "compiled rule");
        rules.push(Rule { name, plan });

        inputs = ctx.into_inputs();
    }

    Ok(CompiledRuleSet {
        rules,
        inputs: inputs.into_vec(),
    })
}

/// Definitions sharing a rule name must agree on arity. The grammar
/// enforces this for parsed sources; programmatic ASTs land here.
fn check_arities(definitions: &[RuleDefinition]) -> Result<()> {
    let mut arities: HashMap<&str, usize> = HashMap::new();
    for def in definitions {
        match arities.get(def.name.as_str()) {
            Some(&arity) if arity != def.arity() => {
                return Err(CompileError::Grammar {
                    trace: "rule set".to_string(),
                    expected: format!("a {arity}-ary head for rule {}", def.name),
                    found: format!("{} head variables", def.arity()),
                });
            }
            Some(_) => {}
            None => {
                arities.insert(def.name.as_str(), def.arity());
            }
        }
    }
    Ok(())
}
