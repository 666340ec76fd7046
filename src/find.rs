//! Find-spec resolution.
//!
//! After unification, the context holds the answer relation(s). This stage
//! applies aggregations, then projects the answer onto the find symbols.

use crate::ast::{FindElement, FnArg, Variable};
use crate::error::Result;
use crate::plan::Plan;
use crate::unify::UnificationContext;

/// Resolve a find specification against a unified context, producing the
/// final query plan.
pub fn resolve_find(ctx: &mut UnificationContext, find: &[FindElement]) -> Result<Plan> {
    // Aggregates wrap the relation binding their arguments; constants in
    // aggregate arguments hoist into inputs like predicate constants do.
    for element in find {
        if let FindElement::Aggregate(call) = element {
            let args: Vec<Variable> = call
                .args
                .iter()
                .map(|arg| match arg {
                    FnArg::Var(v) => v.clone(),
                    FnArg::Const(value) => ctx.hoist_constant(value.clone()),
                })
                .collect();
            ctx.apply_aggregate(call.function, &args)?;
        }
    }

    let symbols = find_symbols(find);
    let answer = ctx.answer_relation(&symbols)?;

    if answer.symbols == symbols {
        Ok(answer.plan)
    } else {
        let positions = ctx.resolve_all(&symbols)?;
        Ok(Plan::Project(Box::new(answer.plan), positions))
    }
}

/// The full list of find symbols, flattening aggregates to their variable
/// arguments.
fn find_symbols(find: &[FindElement]) -> Vec<Variable> {
    let mut symbols = Vec::new();
    for element in find {
        match element {
            FindElement::Var(v) => symbols.push(v.clone()),
            FindElement::Aggregate(call) => {
                for arg in &call.args {
                    if let FnArg::Var(v) = arg {
                        symbols.push(v.clone());
                    }
                }
            }
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AggregateCall, AggregateFn, Clause};
    use crate::error::CompileError;
    use crate::normalize::{InputTable, Normalizer};
    use crate::reorder::reorder;
    use crate::schema::AttributeMap;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    fn unified<'a>(attributes: &'a AttributeMap, clauses: &[Clause]) -> UnificationContext<'a> {
        let (inputs, mut normalized) = Normalizer::new(InputTable::new()).normalize(clauses);
        reorder(&mut normalized);
        let mut ctx = UnificationContext::new(attributes, inputs);
        ctx.unify(normalized).expect("unification");
        ctx
    }

    fn has_attr(e: &str, attr: &str, v: &str) -> Clause {
        Clause::HasAttr(var(e), attr.to_string(), var(v))
    }

    #[test]
    fn test_projection_inserted_when_symbols_differ() {
        let attributes: AttributeMap = [("a", 1), ("b", 2)].into_iter().collect();
        let mut ctx = unified(
            &attributes,
            &[has_attr("?e", "a", "?v"), has_attr("?e", "b", "?w")],
        );

        let plan =
            resolve_find(&mut ctx, &[FindElement::Var(var("?w"))]).expect("find resolution");
        let Plan::Project(_, positions) = plan else {
            panic!("expected a projection, got {plan:?}");
        };
        assert_eq!(positions.len(), 1);
    }

    #[test]
    fn test_projection_skipped_when_symbols_match() {
        let attributes: AttributeMap = [("a", 1)].into_iter().collect();
        let mut ctx = unified(&attributes, &[has_attr("?e", "a", "?v")]);

        let plan = resolve_find(
            &mut ctx,
            &[FindElement::Var(var("?e")), FindElement::Var(var("?v"))],
        )
        .expect("find resolution");
        assert!(matches!(plan, Plan::HasAttr(_, 1, _)));
    }

    #[test]
    fn test_aggregate_wraps_answer() {
        let attributes: AttributeMap = [("a", 1)].into_iter().collect();
        let mut ctx = unified(&attributes, &[has_attr("?e", "a", "?t")]);

        let plan = resolve_find(
            &mut ctx,
            &[FindElement::Aggregate(AggregateCall {
                function: AggregateFn::Min,
                args: vec![FnArg::Var(var("?t"))],
            })],
        )
        .expect("find resolution");

        let Plan::Project(child, _) = plan else {
            panic!("expected a projection, got {plan:?}");
        };
        assert!(matches!(*child, Plan::Aggregate(AggregateFn::Min, _, _)));
    }

    #[test]
    fn test_aggregate_over_unbound_symbols_fails() {
        let attributes: AttributeMap = [("a", 1)].into_iter().collect();
        let mut ctx = unified(&attributes, &[has_attr("?e", "a", "?t")]);

        let err = resolve_find(
            &mut ctx,
            &[FindElement::Aggregate(AggregateCall {
                function: AggregateFn::Min,
                args: vec![FnArg::Var(var("?missing"))],
            })],
        )
        .expect_err("must fail");
        assert!(matches!(err, CompileError::AggregateUnbound { .. }));
    }
}
