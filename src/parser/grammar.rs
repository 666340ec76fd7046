//! Grammar validation.
//!
//! Checks a [`Syntax`] tree against the query and rule-set grammars and
//! produces the typed AST. Every rejection carries a parse trace: the path
//! of sections and subtrees from the top-level form down to the offending
//! form, together with the expected shape and the rendered form found.

use super::Syntax;
use crate::ast::{
    AggregateCall, AggregateFn, Clause, FindElement, FnArg, PredicateOp, Query, RuleDefinition,
    Variable,
};
use crate::error::{CompileError, Result};
use crate::value::Value;
use crate::Eid;
use std::collections::HashMap;

const SECTION_KEYWORDS: [&str; 3] = ["find", "in", "where"];
const RESERVED_SYMBOLS: [&str; 4] = ["and", "or", "or-join", "not"];

/// Validate a top-level form as a query.
pub fn parse_query(form: &Syntax) -> Result<Query> {
    let mut trace = Trace::new("query");

    let Syntax::Vector(items) = form else {
        return Err(trace.fail("a query vector [:find ... :where ...]", form));
    };

    let sections = split_sections(&mut trace, items)?;

    let mut find = None;
    let mut inputs = Vec::new();
    let mut where_clauses = None;

    for (keyword, forms) in &sections {
        match keyword.as_str() {
            "find" => {
                trace.enter(":find");
                let elements = parse_find_spec(&mut trace, forms)?;
                trace.leave();
                find = Some(elements);
            }
            "in" => {
                trace.enter(":in");
                if forms.is_empty() {
                    return Err(trace.fail_str("at least one input variable", "nothing"));
                }
                for (i, f) in forms.iter().enumerate() {
                    trace.enter(format!("input {}", i + 1));
                    inputs.push(parse_variable(&mut trace, f)?);
                    trace.leave();
                }
                trace.leave();
            }
            "where" => {
                trace.enter(":where");
                if forms.is_empty() {
                    return Err(trace.fail_str("at least one clause", "nothing"));
                }
                let mut clauses = Vec::new();
                for (i, f) in forms.iter().enumerate() {
                    trace.enter(format!("clause {}", i + 1));
                    clauses.push(parse_clause(&mut trace, f)?);
                    trace.leave();
                }
                trace.leave();
                where_clauses = Some(clauses);
            }
            _ => unreachable!("split_sections only yields known sections"),
        }
    }

    let Some(find) = find else {
        return Err(trace.fail_str("a :find section", "none"));
    };
    let Some(where_clauses) = where_clauses else {
        return Err(trace.fail_str("a :where section", "none"));
    };

    Ok(Query {
        find,
        inputs,
        where_clauses,
    })
}

/// Validate a top-level form as a rule set.
pub fn parse_rules(form: &Syntax) -> Result<Vec<RuleDefinition>> {
    let mut trace = Trace::new("rule set");

    let Syntax::Vector(items) = form else {
        return Err(trace.fail("a vector of rule definitions", form));
    };
    if items.is_empty() {
        return Err(trace.fail_str("at least one rule definition", "an empty vector"));
    }

    let mut rules = Vec::new();
    let mut arities: HashMap<String, usize> = HashMap::new();

    for (i, item) in items.iter().enumerate() {
        trace.enter(format!("rule {}", i + 1));
        let rule = parse_rule_definition(&mut trace, item)?;

        match arities.get(&rule.name) {
            Some(&arity) if arity != rule.arity() => {
                return Err(trace.fail_str(
                    format!("a {arity}-ary head for rule {}", rule.name),
                    format!("{} head variables", rule.arity()),
                ));
            }
            Some(_) => {}
            None => {
                arities.insert(rule.name.clone(), rule.arity());
            }
        }

        rules.push(rule);
        trace.leave();
    }

    Ok(rules)
}

// ============================================================================
// Sections
// ============================================================================

/// Split a query vector into keyword-delimited sections, in order.
fn split_sections<'a>(
    trace: &mut Trace,
    items: &'a [Syntax],
) -> Result<Vec<(String, Vec<&'a Syntax>)>> {
    let mut sections: Vec<(String, Vec<&'a Syntax>)> = Vec::new();

    for item in items {
        if let Syntax::Keyword(k) = item {
            if !SECTION_KEYWORDS.contains(&k.as_str()) {
                return Err(trace.fail("a :find, :in, or :where section", item));
            }
            if sections.iter().any(|(name, _)| name == k) {
                return Err(trace.fail_str(format!("a single :{k} section"), format!("two :{k} sections")));
            }
            if sections.is_empty() && k != "find" {
                return Err(trace.fail("a query starting with :find", item));
            }
            sections.push((k.clone(), Vec::new()));
        } else {
            match sections.last_mut() {
                Some((_, forms)) => forms.push(item),
                None => return Err(trace.fail("a query starting with :find", item)),
            }
        }
    }

    Ok(sections)
}

fn parse_find_spec(trace: &mut Trace, forms: &[&Syntax]) -> Result<Vec<FindElement>> {
    if forms.is_empty() {
        return Err(trace.fail_str("at least one find element", "nothing"));
    }
    let mut elements = Vec::new();
    for (i, form) in forms.iter().enumerate() {
        trace.enter(format!("element {}", i + 1));
        elements.push(parse_find_element(trace, form)?);
        trace.leave();
    }
    Ok(elements)
}

fn parse_find_element(trace: &mut Trace, form: &Syntax) -> Result<FindElement> {
    match form {
        Syntax::Symbol(s) if s.starts_with('?') => Ok(FindElement::Var(Variable::new(s.clone()))),
        Syntax::List(items) => {
            let Some(head) = items.first().and_then(Syntax::as_symbol) else {
                return Err(trace.fail("an aggregate call like (min ?x)", form));
            };
            let Some(function) = AggregateFn::parse(head) else {
                return Err(trace.fail("a known aggregate function (min, max, count, sum, avg)", form));
            };
            if items.len() < 2 {
                return Err(trace.fail("at least one aggregate argument", form));
            }
            let args = items[1..]
                .iter()
                .map(|f| parse_fn_arg(trace, f))
                .collect::<Result<Vec<_>>>()?;
            Ok(FindElement::Aggregate(AggregateCall { function, args }))
        }
        _ => Err(trace.fail("a variable or an aggregate call", form)),
    }
}

// ============================================================================
// Clauses
// ============================================================================

fn parse_clause(trace: &mut Trace, form: &Syntax) -> Result<Clause> {
    match form {
        Syntax::Vector(items) => parse_vector_clause(trace, form, items),
        Syntax::List(items) => parse_list_clause(trace, form, items),
        _ => Err(trace.fail("a data pattern, predicate expression, or rule invocation", form)),
    }
}

fn parse_vector_clause(trace: &mut Trace, form: &Syntax, items: &[Syntax]) -> Result<Clause> {
    // [(op arg arg)] — predicate expression
    if items.len() == 1 {
        if let Syntax::List(inner) = &items[0] {
            return parse_pred_expr(trace, form, inner);
        }
    }

    if items.len() != 3 {
        return Err(trace.fail("a three-place data pattern or a [(predicate ...)] expression", form));
    }

    match (&items[0], &items[1], &items[2]) {
        (Syntax::Number(e), Syntax::Keyword(a), v) if v.is_variable() => Ok(Clause::Lookup(
            parse_eid(trace, &items[0], *e)?,
            a.clone(),
            parse_variable(trace, v)?,
        )),
        (Syntax::Number(e), a, v) if a.is_variable() && v.is_variable() => Ok(Clause::Entity(
            parse_eid(trace, &items[0], *e)?,
            parse_variable(trace, a)?,
            parse_variable(trace, v)?,
        )),
        (e, Syntax::Keyword(a), v) if e.is_variable() && v.is_variable() => Ok(Clause::HasAttr(
            parse_variable(trace, e)?,
            a.clone(),
            parse_variable(trace, v)?,
        )),
        (e, Syntax::Keyword(a), v) if e.is_variable() => Ok(Clause::Filter(
            parse_variable(trace, e)?,
            a.clone(),
            parse_value(trace, v)?,
        )),
        _ => Err(trace.fail(
            "a data pattern: [eid :attr ?v], [eid ?a ?v], [?e :attr ?v], or [?e :attr value]",
            form,
        )),
    }
}

fn parse_list_clause(trace: &mut Trace, form: &Syntax, items: &[Syntax]) -> Result<Clause> {
    let Some(head) = items.first().and_then(Syntax::as_symbol) else {
        return Err(trace.fail("a rule invocation or logical form", form));
    };

    match head {
        "and" | "or" | "not" => {
            let children = parse_nested_clauses(trace, form, &items[1..])?;
            Ok(match head {
                "and" => Clause::And(children),
                "or" => Clause::Or(children),
                _ => Clause::Not(children),
            })
        }
        "or-join" => {
            let Some(Syntax::Vector(proj_forms)) = items.get(1) else {
                return Err(trace.fail("(or-join [?var ...] clause ...)", form));
            };
            if proj_forms.is_empty() {
                return Err(trace.fail("a non-empty or-join projection", form));
            }
            let projection = proj_forms
                .iter()
                .map(|f| parse_variable(trace, f))
                .collect::<Result<Vec<_>>>()?;
            let children = parse_nested_clauses(trace, form, &items[2..])?;
            Ok(Clause::OrJoin(projection, children))
        }
        _ if PredicateOp::parse(head).is_some() => {
            Err(trace.fail("a predicate expression wrapped in a vector, like [(< ?a ?b)]", form))
        }
        _ if head.starts_with('?') => {
            Err(trace.fail("a rule name (rule names are not variables)", form))
        }
        _ => {
            if items.len() < 2 {
                return Err(trace.fail("a rule invocation with at least one argument", form));
            }
            let args = items[1..]
                .iter()
                .map(|f| parse_fn_arg(trace, f))
                .collect::<Result<Vec<_>>>()?;
            Ok(Clause::RuleExpr(head.to_string(), args))
        }
    }
}

fn parse_nested_clauses(trace: &mut Trace, form: &Syntax, items: &[Syntax]) -> Result<Vec<Clause>> {
    if items.is_empty() {
        return Err(trace.fail("at least one nested clause", form));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, f)| {
            trace.enter(format!("clause {}", i + 1));
            let clause = parse_clause(trace, f)?;
            trace.leave();
            Ok(clause)
        })
        .collect()
}

fn parse_pred_expr(trace: &mut Trace, form: &Syntax, items: &[Syntax]) -> Result<Clause> {
    let Some(head) = items.first().and_then(Syntax::as_symbol) else {
        return Err(trace.fail("a predicate expression like [(< ?a ?b)]", form));
    };
    let Some(op) = PredicateOp::parse(head) else {
        return Err(trace.fail("a comparison predicate (<, <=, >, >=, =, !=)", form));
    };
    if items.len() != 3 {
        return Err(trace.fail("exactly two predicate arguments", form));
    }
    let args = items[1..]
        .iter()
        .map(|f| parse_fn_arg(trace, f))
        .collect::<Result<Vec<_>>>()?;
    Ok(Clause::PredExpr(op, args))
}

// ============================================================================
// Rules
// ============================================================================

fn parse_rule_definition(trace: &mut Trace, form: &Syntax) -> Result<RuleDefinition> {
    let Syntax::Vector(items) = form else {
        return Err(trace.fail("a rule definition [(name ?var ...) clause ...]", form));
    };
    let Some(Syntax::List(head_forms)) = items.first() else {
        return Err(trace.fail("a rule head (name ?var ...)", form));
    };

    trace.enter("head");
    let Some(name) = head_forms.first().and_then(Syntax::as_symbol) else {
        return Err(trace.fail("a rule name", &items[0]));
    };
    if name.starts_with('?') || RESERVED_SYMBOLS.contains(&name) || PredicateOp::parse(name).is_some()
    {
        return Err(trace.fail_str("a rule name distinct from variables and built-ins", name));
    }
    if head_forms.len() < 2 {
        return Err(trace.fail("at least one head variable", &items[0]));
    }
    let head = head_forms[1..]
        .iter()
        .map(|f| parse_variable(trace, f))
        .collect::<Result<Vec<_>>>()?;
    trace.leave();

    if items.len() < 2 {
        return Err(trace.fail("at least one body clause", form));
    }
    let body = items[1..]
        .iter()
        .enumerate()
        .map(|(i, f)| {
            trace.enter(format!("clause {}", i + 1));
            let clause = parse_clause(trace, f)?;
            trace.leave();
            Ok(clause)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RuleDefinition {
        name: name.to_string(),
        head,
        body,
    })
}

// ============================================================================
// Terminals
// ============================================================================

fn parse_variable(trace: &mut Trace, form: &Syntax) -> Result<Variable> {
    match form {
        Syntax::Symbol(s) if s.starts_with('?') => Ok(Variable::new(s.clone())),
        _ => Err(trace.fail("a variable like ?x", form)),
    }
}

fn parse_fn_arg(trace: &mut Trace, form: &Syntax) -> Result<FnArg> {
    match form {
        Syntax::Symbol(s) if s.starts_with('?') => Ok(FnArg::Var(Variable::new(s.clone()))),
        Syntax::Number(n) => Ok(FnArg::Const(Value::Number(*n))),
        Syntax::Str(s) => Ok(FnArg::Const(Value::String(s.clone()))),
        Syntax::Bool(b) => Ok(FnArg::Const(Value::Bool(*b))),
        _ => Err(trace.fail("a variable or constant argument", form)),
    }
}

fn parse_value(trace: &mut Trace, form: &Syntax) -> Result<Value> {
    match form {
        Syntax::Number(n) => Ok(Value::Number(*n)),
        Syntax::Str(s) => Ok(Value::String(s.clone())),
        Syntax::Bool(b) => Ok(Value::Bool(*b)),
        _ => Err(trace.fail("a constant value", form)),
    }
}

fn parse_eid(trace: &mut Trace, form: &Syntax, n: i64) -> Result<Eid> {
    Eid::try_from(n).map_err(|_| trace.fail("a non-negative entity id", form))
}

// ============================================================================
// Parse traces
// ============================================================================

/// Path from the top-level form to the form currently being validated.
struct Trace {
    path: Vec<String>,
}

impl Trace {
    fn new(root: &str) -> Self {
        Trace {
            path: vec![root.to_string()],
        }
    }

    fn enter(&mut self, segment: impl Into<String>) {
        self.path.push(segment.into());
    }

    fn leave(&mut self) {
        self.path.pop();
    }

    fn fail(&self, expected: impl Into<String>, found: &Syntax) -> CompileError {
        self.fail_str(expected, found.to_string())
    }

    fn fail_str(&self, expected: impl Into<String>, found: impl Into<String>) -> CompileError {
        CompileError::Grammar {
            trace: self.path.join(" > "),
            expected: expected.into(),
            found: found.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read;

    fn query(source: &str) -> Result<Query> {
        parse_query(&read(source).expect("read"))
    }

    fn rules(source: &str) -> Result<Vec<RuleDefinition>> {
        parse_rules(&read(source).expect("read"))
    }

    #[test]
    fn test_parse_simple_query() {
        let q = query("[:find ?e ?n :where [?e :person/name ?n]]").expect("parse");
        assert_eq!(q.find.len(), 2);
        assert!(q.inputs.is_empty());
        assert_eq!(
            q.where_clauses,
            vec![Clause::HasAttr(
                Variable::new("?e"),
                "person/name".to_string(),
                Variable::new("?n"),
            )]
        );
    }

    #[test]
    fn test_parse_pattern_shapes() {
        let q = query(
            "[:find ?v :where [17 :doc/title ?v] [18 ?a ?v] [?e :doc/id ?v] [?e :doc/tag \"x\"]]",
        )
        .expect("parse");
        assert!(matches!(q.where_clauses[0], Clause::Lookup(17, _, _)));
        assert!(matches!(q.where_clauses[1], Clause::Entity(18, _, _)));
        assert!(matches!(q.where_clauses[2], Clause::HasAttr(_, _, _)));
        assert!(matches!(q.where_clauses[3], Clause::Filter(_, _, _)));
    }

    #[test]
    fn test_parse_in_section() {
        let q = query("[:find ?n :in ?dept ?min :where [?e :emp/dept ?dept] [?e :emp/name ?n]]")
            .expect("parse");
        assert_eq!(
            q.inputs,
            vec![Variable::new("?dept"), Variable::new("?min")]
        );
    }

    #[test]
    fn test_parse_logic_forms() {
        let q = query(
            "[:find ?e :where (or-join [?e] (and [?e :a ?x]) (and [?e :b ?y])) (not (old ?e))]",
        )
        .expect("parse");
        assert!(matches!(&q.where_clauses[0], Clause::OrJoin(proj, children)
            if proj.len() == 1 && children.len() == 2));
        assert!(matches!(&q.where_clauses[1], Clause::Not(children)
            if matches!(&children[0], Clause::RuleExpr(name, _) if name == "old")));
    }

    #[test]
    fn test_parse_aggregate_find() {
        let q = query("[:find (min ?t) :where [?op :assign/time ?t]]").expect("parse");
        assert!(matches!(&q.find[0], FindElement::Aggregate(call)
            if call.function == AggregateFn::Min && call.args.len() == 1));
    }

    #[test]
    fn test_reject_missing_where() {
        let err = query("[:find ?e]").expect_err("must fail");
        assert!(matches!(err, CompileError::Grammar { .. }));
    }

    #[test]
    fn test_reject_empty_where() {
        let err = query("[:find ?e :where]").expect_err("must fail");
        let CompileError::Grammar { trace, .. } = &err else {
            panic!("expected a grammar error, got {err:?}");
        };
        assert!(trace.contains(":where"));
    }

    #[test]
    fn test_reject_bare_predicate() {
        let err = query("[:find ?a :where [?e :v ?a] (< ?a 3)]").expect_err("must fail");
        let CompileError::Grammar { expected, .. } = &err else {
            panic!("expected a grammar error, got {err:?}");
        };
        assert!(expected.contains("wrapped in a vector"));
    }

    #[test]
    fn test_reject_malformed_pattern() {
        let err = query("[:find ?a :where [?e ?a]]").expect_err("must fail");
        let CompileError::Grammar { trace, .. } = &err else {
            panic!("expected a grammar error, got {err:?}");
        };
        assert!(trace.contains("clause 1"), "trace was: {trace}");
    }

    #[test]
    fn test_parse_rule_set() {
        let defs = rules(
            "[[(propagate ?x ?y) [?x :node ?y]]
              [(propagate ?x ?y) [?z :edge ?y] (propagate ?x ?z)]]",
        )
        .expect("parse");
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "propagate");
        assert_eq!(defs[0].arity(), 2);
        assert_eq!(defs[1].body.len(), 2);
    }

    #[test]
    fn test_reject_rule_arity_mismatch() {
        let err = rules("[[(reach ?x ?y) [?x :edge ?y]] [(reach ?x) [?x :root true]]]")
            .expect_err("must fail");
        let CompileError::Grammar { expected, .. } = &err else {
            panic!("expected a grammar error, got {err:?}");
        };
        assert!(expected.contains("2-ary"));
    }

    #[test]
    fn test_reject_variable_rule_name() {
        let err = rules("[[(?bad ?x) [?x :a ?x]]]").expect_err("must fail");
        assert!(matches!(err, CompileError::Grammar { .. }));
    }
}
