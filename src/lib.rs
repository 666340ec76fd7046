//! # flowlog
//!
//! Compiler from a Datalog-style query language (recursive rules,
//! disjunction, negation, predicates, aggregation) into relational
//! dataflow plans for an incremental dataflow executor. The executor
//! itself, the schema registry, and plan transport are external
//! collaborators; this crate is the pure, single-threaded compiler.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Source Text
//!     ↓
//! [Reader]           → Syntax tree
//!     ↓
//! [Grammar]          → Query / RuleSet AST
//!     ↓
//! [Normalizer]       → tagged flat clauses + hoisted inputs
//!     ↓
//! [Reorderer]        → dependency-friendly clause order
//!     ↓
//! [Unifier]          → single answer relation
//!     ↓
//! [Find Resolver]    → Aggregate / Project nodes
//!     ↓
//! CompiledQuery { plan, inputs }
//! ```
//!
//! Rule sets run through the same pipeline per rule head, seeded with the
//! head variables; recursive references remain [`Plan::RuleExpr`] nodes
//! for the executor to resolve.
//!
//! Compilation is deterministic: the same source and attribute map always
//! produce the same plan, byte for byte.
//!
//! ## Usage
//!
//! ```
//! use flowlog::{compile_query, AttributeMap};
//!
//! let attributes: AttributeMap = [("assign/time", 1)].into_iter().collect();
//!
//! let compiled = compile_query(
//!     "[:find (min ?t) :where [?op :assign/time ?t]]",
//!     &attributes,
//! )?;
//!
//! assert!(compiled.inputs.is_empty());
//! # Ok::<(), flowlog::CompileError>(())
//! ```

pub mod ast;
pub mod error;
pub mod find;
pub mod normalize;
pub mod parser;
pub mod plan;
pub mod reorder;
pub mod rules;
pub mod schema;
pub mod unify;
pub mod value;

pub use ast::{
    AggregateCall, AggregateFn, Clause, FindElement, FnArg, PredicateOp, Query, RuleDefinition,
    Variable,
};
pub use error::{CompileError, Result};
pub use plan::{CompiledQuery, CompiledRuleSet, InputBinding, Plan, Rule};
pub use schema::AttributeMap;
pub use value::Value;

use normalize::{InputTable, Normalizer};
use unify::UnificationContext;

/// A unique entity identifier.
pub type Eid = u64;

/// A unique attribute identifier.
pub type Aid = u32;

/// A positional variable identifier, assigned in registration order.
pub type Var = u32;

/// Parse a query source into its AST.
pub fn parse_query(source: &str) -> Result<Query> {
    parser::grammar::parse_query(&parser::read(source)?)
}

/// Parse a rule-set source into its AST.
pub fn parse_rules(source: &str) -> Result<Vec<RuleDefinition>> {
    parser::grammar::parse_rules(&parser::read(source)?)
}

/// Compile a query source into a plan and its input table.
pub fn compile_query(source: &str, attributes: &AttributeMap) -> Result<CompiledQuery> {
    compile_parsed_query(&parse_query(source)?, attributes)
}

/// Compile an already parsed query.
pub fn compile_parsed_query(query: &Query, attributes: &AttributeMap) -> Result<CompiledQuery> {
    let mut inputs = InputTable::new();
    for (index, var) in query.inputs.iter().enumerate() {
        inputs.push_external(var.clone(), index);
    }

    let (inputs, mut clauses) = Normalizer::new(inputs).normalize(&query.where_clauses);
    reorder::reorder(&mut clauses);

    let mut ctx = UnificationContext::new(attributes, inputs);
    ctx.unify(clauses)?;
    let plan = find::resolve_find(&mut ctx, &query.find)?;

    Ok(CompiledQuery {
        plan,
        inputs: ctx.into_inputs().into_vec(),
    })
}

/// Compile a rule-set source into one plan per distinct rule head.
pub fn compile_rules(source: &str, attributes: &AttributeMap) -> Result<CompiledRuleSet> {
    compile_parsed_rules(&parse_rules(source)?, attributes)
}

/// Compile already parsed rule definitions.
pub fn compile_parsed_rules(
    definitions: &[RuleDefinition],
    attributes: &AttributeMap,
) -> Result<CompiledRuleSet> {
    rules::compile_rule_set(definitions, attributes)
}
