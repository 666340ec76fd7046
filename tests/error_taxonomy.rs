//! Failure-mode coverage: every compilation error is fatal, structured,
//! and carries enough context to locate the offending clause.

use flowlog::{compile_query, compile_rules, AttributeMap, CompileError, Variable};

fn schema() -> AttributeMap {
    [("a", 1), ("b", 2), ("c", 3), ("d", 4)].into_iter().collect()
}

#[test]
fn read_errors_carry_positions() {
    let err = compile_query("[:find ?e", &schema()).expect_err("must fail");
    let CompileError::Read { line, column, .. } = err else {
        panic!("expected a read error, got {err:?}");
    };
    assert_eq!(line, 1);
    assert!(column > 1);
}

#[test]
fn empty_where_is_a_grammar_error() {
    let err = compile_query("[:find ?e :where]", &schema()).expect_err("must fail");
    assert!(matches!(err, CompileError::Grammar { .. }));
}

#[test]
fn missing_find_is_a_grammar_error() {
    let err = compile_query("[:where [?e :a ?v]]", &schema()).expect_err("must fail");
    assert!(matches!(err, CompileError::Grammar { .. }));
}

#[test]
fn unknown_attributes_are_rejected() {
    let err = compile_query("[:find ?v :where [?e :missing ?v]]", &schema()).expect_err("must fail");
    assert_eq!(err, CompileError::UnknownAttribute("missing".to_string()));
    assert!(err.to_string().contains(":missing"));
}

#[test]
fn unbound_find_symbol_is_reported_by_name() {
    let err = compile_query("[:find ?nope :where [?e :a ?v]]", &schema()).expect_err("must fail");
    assert_eq!(
        err,
        CompileError::FindUnbound {
            symbols: vec![Variable::new("?nope")]
        }
    );
}

#[test]
fn find_symbols_split_across_relations_are_unbound() {
    let err = compile_query("[:find ?e ?x :where [?e :a ?v] [?x :b ?w]]", &schema())
        .expect_err("must fail");
    let CompileError::FindUnbound { symbols } = err else {
        panic!("expected FindUnbound, got {err:?}");
    };
    assert_eq!(symbols, vec![Variable::new("?e"), Variable::new("?x")]);
}

#[test]
fn negation_without_positive_partner_stabilizes() {
    let err =
        compile_query("[:find ?e :where (not [?e :a ?v])]", &schema()).expect_err("must fail");
    let CompileError::UnintroducableClauses { clauses, symbols } = err else {
        panic!("expected UnintroducableClauses, got {err:?}");
    };
    assert_eq!(clauses.len(), 1);
    assert!(symbols.contains(&Variable::new("?e")));
    assert!(symbols.contains(&Variable::new("?v")));
}

#[test]
fn predicate_spanning_two_relations_is_unbound() {
    let err = compile_query(
        "[:find ?v :where [?e :a ?v] [?x :b ?w] [(< ?v ?w)]]",
        &schema(),
    )
    .expect_err("must fail");
    let CompileError::PredicateUnbound { symbols, .. } = err else {
        panic!("expected PredicateUnbound, got {err:?}");
    };
    assert_eq!(symbols, vec![Variable::new("?v"), Variable::new("?w")]);
}

#[test]
fn disjunction_branches_must_bind_the_projection() {
    let err = compile_query("[:find ?e :where (or [?e :a ?v] [?e :b ?w])]", &schema())
        .expect_err("must fail");
    let CompileError::UnionIncompatible { projection, symbols } = err else {
        panic!("expected UnionIncompatible, got {err:?}");
    };
    assert_eq!(projection, vec![Variable::new("?e"), Variable::new("?v")]);
    assert_eq!(symbols, vec![Variable::new("?e"), Variable::new("?w")]);
}

#[test]
fn negated_branch_under_disjunction_is_unbound_not() {
    let err = compile_query(
        "[:find ?v :where [?e :a ?v] (or [?e :b ?v] (not [?e :c ?v]))]",
        &schema(),
    )
    .expect_err("must fail");
    assert!(matches!(err, CompileError::UnboundNot { .. }));
}

#[test]
fn nested_same_key_disjunctions_refuse_to_merge() {
    let err = compile_query(
        "[:find ?e ?v
          :where (or (or [?e :a ?v] [?e :b ?v]) (or [?e :c ?v] [?e :d ?v]))]",
        &schema(),
    )
    .expect_err("must fail");
    assert_eq!(err, CompileError::UnionOfUnions);
}

#[test]
fn aggregate_over_unbound_arguments_fails() {
    let err = compile_query("[:find (min ?q) :where [?e :a ?v]]", &schema()).expect_err("must fail");
    assert_eq!(
        err,
        CompileError::AggregateUnbound {
            symbols: vec![Variable::new("?q")]
        }
    );
}

#[test]
fn rule_arity_mismatch_is_a_grammar_error() {
    let err = compile_rules(
        "[[(reach ?x ?y) [?x :a ?y]] [(reach ?x) [?x :b ?x]]]",
        &schema(),
    )
    .expect_err("must fail");
    let CompileError::Grammar {
        expected, found, ..
    } = &err
    else {
        panic!("expected a grammar error, got {err:?}");
    };
    assert!(expected.contains("2-ary"));
    assert!(found.contains("1"));
}

#[test]
fn grammar_errors_name_the_offending_clause() {
    let err = compile_query("[:find ?e :where [?e :a ?v] [?e ?v]]", &schema())
        .expect_err("must fail");
    let CompileError::Grammar { trace, found, .. } = &err else {
        panic!("expected a grammar error, got {err:?}");
    };
    assert!(trace.contains("clause 2"), "trace was: {trace}");
    assert!(found.contains("[?e ?v]"), "found was: {found}");
}
