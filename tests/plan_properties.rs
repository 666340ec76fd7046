//! Property-based invariants over compiled plans (proptest).

use flowlog::normalize::{FlatClause, InputTable, Normalizer};
use flowlog::reorder::reorder;
use flowlog::{
    compile_query, AttributeMap, Clause, FnArg, Plan, PredicateOp, Value, Variable,
};
use proptest::prelude::*;

const ATTRS: [&str; 5] = ["zz/a0", "zz/a1", "zz/a2", "zz/a3", "zz/a4"];

fn schema() -> AttributeMap {
    ATTRS
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i as u32 + 1))
        .collect()
}

/// Structural invariants every plan tree must satisfy.
fn check_bind_invariants(plan: &Plan) {
    plan.visit(&mut |node| match node {
        Plan::Join(left, right, key) => {
            assert!(
                left.bound_variables().contains(key) && right.bound_variables().contains(key),
                "join key {key} must be bound on both sides"
            );
        }
        Plan::Antijoin(_, right, keys) => {
            let bound = right.bound_variables();
            assert!(
                keys.iter().all(|k| bound.contains(k)),
                "the negative side must bind every antijoin key"
            );
        }
        Plan::Union(positions, children) => {
            for child in children {
                let bound = child.bound_variables();
                assert!(
                    positions.iter().all(|p| bound.contains(p)),
                    "every union child must bind the union projection"
                );
            }
        }
        Plan::Project(child, positions) => {
            let bound = child.bound_variables();
            assert!(
                positions.iter().all(|p| bound.contains(p)),
                "a projection's child must bind at least the projected positions"
            );
        }
        _ => {}
    });
}

/// A star-shaped conjunctive query: every pattern shares `?e`.
fn star_source(specs: &[(usize, usize)], predicates: &[(usize, i64)]) -> String {
    let mut source = String::from("[:find ?e :where");
    for (attr, var) in specs {
        source.push_str(&format!(" [?e :{} ?v{var}]", ATTRS[*attr]));
    }
    for (pick, constant) in predicates {
        let var = specs[pick % specs.len()].1;
        source.push_str(&format!(" [(< ?v{var} {constant})]"));
    }
    source.push(']');
    source
}

proptest! {
    #[test]
    fn star_queries_compile_deterministically(
        specs in prop::collection::vec((0usize..5, 0usize..4), 1..6),
    ) {
        let source = star_source(&specs, &[]);
        let first = compile_query(&source, &schema()).expect("compile");
        let second = compile_query(&source, &schema()).expect("compile");

        prop_assert_eq!(&first, &second);
        let first_json = serde_json::to_string(&first).expect("serialize");
        let second_json = serde_json::to_string(&second).expect("serialize");
        prop_assert_eq!(first_json, second_json);
    }

    #[test]
    fn star_query_plans_satisfy_bind_invariants(
        specs in prop::collection::vec((0usize..5, 0usize..4), 1..6),
        predicates in prop::collection::vec((0usize..16, -100i64..100), 0..3),
    ) {
        let source = star_source(&specs, &predicates);
        let compiled = compile_query(&source, &schema()).expect("compile");
        check_bind_invariants(&compiled.plan);
    }

    #[test]
    fn hoisted_constants_count_matches_predicates(
        specs in prop::collection::vec((0usize..5, 0usize..4), 1..4),
        predicates in prop::collection::vec((0usize..16, -100i64..100), 0..4),
    ) {
        let source = star_source(&specs, &predicates);
        let compiled = compile_query(&source, &schema()).expect("compile");
        prop_assert_eq!(compiled.inputs.len(), predicates.len());
    }

    #[test]
    fn attribute_names_never_survive_into_plans(
        specs in prop::collection::vec((0usize..5, 0usize..4), 1..6),
    ) {
        let source = star_source(&specs, &[]);
        let compiled = compile_query(&source, &schema()).expect("compile");
        let json = serde_json::to_string(&compiled.plan).expect("serialize");
        prop_assert!(!json.contains("zz/"), "found an attribute name in {}", json);
    }

    #[test]
    fn disjunctions_union_every_branch(branch_attrs in prop::collection::vec(0usize..5, 2..5)) {
        let branches: Vec<String> = branch_attrs
            .iter()
            .map(|a| format!("[?e :{} ?v]", ATTRS[*a]))
            .collect();
        let source = format!("[:find ?e ?v :where (or {})]", branches.join(" "));

        let compiled = compile_query(&source, &schema()).expect("compile");
        check_bind_invariants(&compiled.plan);

        let Plan::Union(_, children) = &compiled.plan else {
            panic!("expected a union, got {:?}", compiled.plan);
        };
        prop_assert_eq!(children.len(), branch_attrs.len());
    }
}

// ============================================================================
// Normalizer round trips
// ============================================================================

fn leaf_clause() -> impl Strategy<Value = Clause> {
    let var = || (0u8..4u8).prop_map(|i| Variable::new(format!("?v{i}")));
    prop_oneof![
        (0u64..50, 0usize..5, var()).prop_map(|(e, a, v)| Clause::Lookup(e, ATTRS[a].to_string(), v)),
        (var(), 0usize..5, var()).prop_map(|(e, a, v)| Clause::HasAttr(e, ATTRS[a].to_string(), v)),
        (var(), 0usize..5, -10i64..10)
            .prop_map(|(e, a, c)| Clause::Filter(e, ATTRS[a].to_string(), Value::Number(c))),
        (var(), var()).prop_map(|(a, b)| {
            Clause::PredExpr(PredicateOp::Lt, vec![FnArg::Var(a), FnArg::Var(b)])
        }),
    ]
}

/// Rebuild source clauses from normalized payloads; leaf-only trees must
/// normalize to the same flat clauses again.
fn reconstruct(body: &FlatClause) -> Clause {
    match body {
        FlatClause::Lookup(e, a, v) => Clause::Lookup(*e, a.clone(), v.clone()),
        FlatClause::Entity(e, a, v) => Clause::Entity(*e, a.clone(), v.clone()),
        FlatClause::HasAttr(e, a, v) => Clause::HasAttr(e.clone(), a.clone(), v.clone()),
        FlatClause::Filter(e, a, value) => Clause::Filter(e.clone(), a.clone(), value.clone()),
        FlatClause::PredExpr(op, args) => {
            Clause::PredExpr(*op, args.iter().cloned().map(FnArg::Var).collect())
        }
        FlatClause::RuleExpr(name, args) => {
            Clause::RuleExpr(name.clone(), args.iter().cloned().map(FnArg::Var).collect())
        }
    }
}

proptest! {
    #[test]
    fn normalization_is_idempotent_over_leaf_inputs(
        clauses in prop::collection::vec(leaf_clause(), 1..8),
    ) {
        let (_, first) = Normalizer::new(InputTable::new()).normalize(&clauses);

        let rebuilt: Vec<Clause> = first.iter().map(|c| reconstruct(&c.body)).collect();
        let (_, second) = Normalizer::new(InputTable::new()).normalize(&rebuilt);

        prop_assert_eq!(first, second);
    }

    #[test]
    fn reordering_preserves_the_clause_set(
        clauses in prop::collection::vec(leaf_clause(), 1..8),
    ) {
        let (_, normalized) = Normalizer::new(InputTable::new()).normalize(&clauses);

        let mut reordered = normalized.clone();
        reorder(&mut reordered);

        let mut before: Vec<u32> = normalized.iter().map(|c| c.id).collect();
        let mut after: Vec<u32> = reordered.iter().map(|c| c.id).collect();
        before.sort_unstable();
        after.sort_unstable();
        prop_assert_eq!(before, after);

        let mut again = reordered.clone();
        reorder(&mut again);
        prop_assert_eq!(reordered, again);
    }
}
