// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the VQL parser and checker.

use proptest::prelude::*;
use verisim_vql::{parse, Statement, TypeChecker};

/// Generate arbitrary field names.
fn arb_field() -> impl Strategy<Value = String> {
    "[a-z]{2,8}"
}

/// Generate arbitrary hexad ids.
fn arb_id() -> impl Strategy<Value = String> {
    "[a-z]{3,6}-[0-9]{1,3}"
}

/// Generate arbitrary modality names.
fn arb_modality() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "GRAPH", "VECTOR", "TENSOR", "SEMANTIC", "DOCUMENT", "TEMPORAL",
    ])
    .prop_map(String::from)
}

proptest! {
    /// The parser never panics, whatever the input.
    #[test]
    fn test_parse_never_panics(input in ".{0,200}") {
        let _ = parse(&input);
    }

    /// Parsing then checking a well-formed projection query terminates and
    /// succeeds - synthesize(parse(q)) is total on this family.
    #[test]
    fn test_synthesize_terminates_on_projection_queries(
        modality in arb_modality(),
        field in arb_field(),
        id in arb_id(),
        limit in 0usize..1000,
    ) {
        let query = format!("SELECT {modality}.{field} FROM HEXAD {id} LIMIT {limit}");
        let statement = parse(&query).expect("well-formed query must parse");
        let checker = TypeChecker::default();
        let typed = checker.check_statement(statement).expect("must check in permissive mode");
        let verisim_vql::TypedStatement::Query(typed) = typed else {
            panic!("expected a query");
        };
        prop_assert_eq!(typed.columns.len(), 1);
    }

    /// Comparison predicates over any field and integer literal parse and
    /// check.
    #[test]
    fn test_where_comparisons_check(
        field in arb_field(),
        value in -1000i64..1000,
    ) {
        let query = format!(
            "SELECT DOCUMENT.{field} FROM STORE s WHERE DOCUMENT.{field} >= {value}"
        );
        let statement = parse(&query).unwrap();
        prop_assert!(TypeChecker::default().check_statement(statement).is_ok());
    }

    /// Parsing is deterministic: the same input yields the same AST.
    #[test]
    fn test_parse_is_deterministic(
        modality in arb_modality(),
        field in arb_field(),
        id in arb_id(),
    ) {
        let query = format!("SELECT {modality}.{field} FROM HEXAD {id}");
        let a = parse(&query).unwrap();
        let b = parse(&query).unwrap();
        match (&a, &b) {
            (Statement::Query(qa), Statement::Query(qb)) => prop_assert_eq!(qa, qb),
            _ => prop_assert!(false, "expected queries"),
        }
    }

    /// Quoted string literals roundtrip through the WHERE clause whatever
    /// their (escaped) content.
    #[test]
    fn test_string_literal_roundtrip(text in "[a-zA-Z0-9 ]{0,40}") {
        let query = format!("SELECT DOCUMENT.title FROM STORE s WHERE DOCUMENT.title = \"{text}\"");
        let statement = parse(&query).unwrap();
        let Statement::Query(q) = statement else { panic!() };
        let Some(verisim_vql::Condition::Pred(verisim_vql::Predicate::Compare { value, .. })) =
            q.where_clause
        else {
            panic!("expected compare predicate");
        };
        prop_assert_eq!(value, verisim_model::Value::Str(text));
    }
}
