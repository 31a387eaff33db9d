// SPDX-License-Identifier: PMPL-1.0-or-later
//! Row assembly, cross-modal evaluation, and post-processing.
//!
//! Rows are keyed by hexad id: one row per hexad, carrying the hexad's
//! modality records plus federation provenance. Post-processing applies
//! GROUP BY, aggregation, HAVING, ORDER BY (nulls last, hexad-id
//! tie-break), projection, and pagination - in that order, so results are
//! deterministic.

use std::collections::BTreeMap;

use verisim_drift::{consistency, drift_score, ConsistencyMetric, EmbeddingPolicy};
use verisim_model::{CmpOp, Hexad, HexadId, Value};
use verisim_store::{FieldPredicate, ScanRow};
use verisim_vql::{AggFunc, Aggregate, Condition, Predicate, Projection, TypedQuery};

use crate::EngineError;

/// One assembled row: a hexad plus provenance annotations.
#[derive(Debug, Clone)]
pub struct Row {
    pub hexad: Hexad,
    pub source_store: Option<String>,
    pub drifted: bool,
}

impl Row {
    pub fn local(hexad: Hexad) -> Self {
        Self {
            hexad,
            source_store: None,
            drifted: false,
        }
    }
}

/// Ambient evaluation context for cross-modal predicates.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub embedding_policy: EmbeddingPolicy,
}

/// Assemble scan rows into hexad-keyed rows. Input order (hexad id) is
/// preserved; every modality row of one hexad folds into one `Row`.
pub fn assemble_rows(scan_rows: Vec<ScanRow>, source_store: Option<&str>) -> Vec<Row> {
    let mut by_id: BTreeMap<HexadId, Hexad> = BTreeMap::new();
    for scan_row in scan_rows {
        let hexad = by_id
            .entry(scan_row.id.clone())
            .or_insert_with(|| Hexad::new(scan_row.id.clone()));
        // Preserve the store's version counter.
        let _ = hexad.put_versioned(scan_row.payload, scan_row.version);
    }
    by_id
        .into_values()
        .map(|hexad| Row {
            hexad,
            source_store: source_store.map(String::from),
            drifted: false,
        })
        .collect()
}

/// Evaluate a full condition tree against one row.
///
/// Handles both pushdown-shaped predicates (field compares, text search,
/// similarity, graph patterns) and the cross-modal forms (DRIFT,
/// CONSISTENT, EXISTS, field-to-field). Aggregate comparisons never appear
/// here - they are HAVING-only and evaluated per group.
pub fn evaluate_condition(
    cond: &Condition,
    row: &Row,
    ctx: &EvalContext,
) -> Result<bool, EngineError> {
    match cond {
        Condition::And(a, b) => {
            Ok(evaluate_condition(a, row, ctx)? && evaluate_condition(b, row, ctx)?)
        }
        Condition::Or(a, b) => {
            Ok(evaluate_condition(a, row, ctx)? || evaluate_condition(b, row, ctx)?)
        }
        Condition::Not(inner) => Ok(!evaluate_condition(inner, row, ctx)?),
        Condition::Pred(pred) => evaluate_predicate(pred, row, ctx),
    }
}

fn evaluate_predicate(pred: &Predicate, row: &Row, ctx: &EvalContext) -> Result<bool, EngineError> {
    let hexad = &row.hexad;
    match pred {
        Predicate::Compare { field, op, value, .. } => {
            Ok(op.eval(&hexad.field(field.modality, &field.field), value))
        }
        Predicate::CompareFields { left, op, right, .. } => {
            let lv = hexad.field(left.modality, &left.field);
            let rv = hexad.field(right.modality, &right.field);
            Ok(op.eval(&lv, &rv))
        }
        Predicate::Contains { modality, field, needle, .. } => {
            let p = FieldPredicate::Contains {
                modality: *modality,
                field: field.clone(),
                needle: needle.clone(),
            };
            Ok(p.matches_payload(hexad.payload(*modality)))
        }
        Predicate::MatchesTerms { modality, field, terms, .. } => {
            let p = FieldPredicate::Matches {
                modality: *modality,
                field: field.clone(),
                terms: terms.clone(),
            };
            Ok(p.matches_payload(hexad.payload(*modality)))
        }
        Predicate::SimilarTo { embedding, threshold, .. } => {
            let p = FieldPredicate::SimilarTo {
                embedding: embedding.clone(),
                threshold: *threshold,
            };
            Ok(p.matches_payload(hexad.payload(verisim_model::Modality::Vector)))
        }
        Predicate::GraphPattern { subject, edge, object, .. } => {
            let p = FieldPredicate::Edge {
                subject: subject.clone(),
                edge: edge.clone(),
                object: object.clone(),
            };
            Ok(p.matches_payload(hexad.payload(verisim_model::Modality::Graph)))
        }
        Predicate::Drift { a, b, op, threshold, .. } => {
            let score = drift_score(hexad, *a, *b, ctx.embedding_policy);
            Ok(op.eval(&Value::Float(score), &Value::Float(*threshold)))
        }
        Predicate::Consistent { a, b, metric, op, threshold, .. } => {
            let metric: ConsistencyMetric = metric
                .parse()
                .map_err(|e: String| EngineError::Internal(e))?;
            let similarity = consistency(hexad, *a, *b, metric, ctx.embedding_policy);
            Ok(op.eval(&Value::Float(similarity), &Value::Float(*threshold)))
        }
        Predicate::Exists { modality, .. } => Ok(hexad.has(*modality)),
        Predicate::NotExists { modality, .. } => Ok(!hexad.has(*modality)),
        Predicate::CompareAggregate { .. } => Err(EngineError::Internal(
            "aggregate predicate outside HAVING".to_string(),
        )),
    }
}

/// A projected output row.
pub type OutRow = BTreeMap<String, Value>;

/// Apply grouping, aggregation, HAVING, ORDER BY, projection, and
/// pagination to filtered rows.
pub fn post_process(
    typed: &TypedQuery,
    rows: Vec<Row>,
    ctx: &EvalContext,
) -> Result<Vec<OutRow>, EngineError> {
    let query = &typed.query;
    let has_aggregates = query
        .projections
        .iter()
        .any(|p| matches!(p, Projection::Aggregate(_)));

    // Group + aggregate, or project row-wise.
    let mut out: Vec<(OutRow, Option<HexadId>)> = if !query.group_by.is_empty() || has_aggregates {
        group_and_aggregate(typed, &rows, ctx)?
    } else {
        rows.iter()
            .map(|row| (project_row(query, row), Some(row.hexad.id.clone())))
            .collect()
    };

    // ORDER BY with per-key direction; nulls last via the value order,
    // ties broken by subsequent keys, then hexad id.
    if !query.order_by.is_empty() {
        out.sort_by(|(a, aid), (b, bid)| {
            for key in &query.order_by {
                let av = a.get(&key.column).cloned().unwrap_or(Value::Null);
                let bv = b.get(&key.column).cloned().unwrap_or(Value::Null);
                let ord = av.total_cmp(&bv);
                let ord = if key.ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            aid.cmp(bid)
        });
    } else {
        // Deterministic default order by hexad id.
        out.sort_by(|(_, aid), (_, bid)| aid.cmp(bid));
    }

    // OFFSET, then LIMIT. LIMIT 0 yields the empty result.
    let offset = query.offset.unwrap_or(0);
    let mut result: Vec<OutRow> = out.into_iter().map(|(row, _)| row).skip(offset).collect();
    if let Some(limit) = query.limit {
        result.truncate(limit);
    }
    Ok(result)
}

/// Project one row through the SELECT list.
fn project_row(query: &verisim_vql::Query, row: &Row) -> OutRow {
    let mut out = OutRow::new();
    for projection in &query.projections {
        match projection {
            Projection::All { .. } => {
                for m in verisim_model::Modality::ALL {
                    if let Some(payload) = row.hexad.payload(m) {
                        out.insert(m.to_string(), modality_value(payload));
                    }
                }
                out.insert("id".to_string(), Value::Str(row.hexad.id.to_string()));
            }
            Projection::Modality { modality, .. } => {
                let value = row
                    .hexad
                    .payload(*modality)
                    .map(modality_value)
                    .unwrap_or(Value::Null);
                out.insert(modality.to_string(), value);
            }
            Projection::Field(field) => {
                out.insert(
                    field.column_name(),
                    row.hexad.field(field.modality, &field.field),
                );
            }
            Projection::Aggregate(_) => {} // handled by grouping
        }
    }
    out
}

/// Render a whole-modality projection as a canonical JSON string of its
/// fields.
fn modality_value(payload: &verisim_model::ModalityPayload) -> Value {
    Value::Str(serde_json::to_string(&payload.fields()).unwrap_or_default())
}

/// Group rows by the GROUP BY tuple and compute each aggregate per group.
/// With no GROUP BY, all rows form a single group.
fn group_and_aggregate(
    typed: &TypedQuery,
    rows: &[Row],
    ctx: &EvalContext,
) -> Result<Vec<(OutRow, Option<HexadId>)>, EngineError> {
    let query = &typed.query;

    let mut groups: BTreeMap<Vec<Value>, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        let key: Vec<Value> = query
            .group_by
            .iter()
            .map(|k| row.hexad.field(k.modality, &k.field))
            .collect();
        groups.entry(key).or_default().push(row);
    }

    let mut out = Vec::new();
    for (key, members) in groups {
        let mut projected = OutRow::new();
        for (field, value) in query.group_by.iter().zip(key.iter()) {
            projected.insert(field.column_name(), value.clone());
        }
        for projection in &query.projections {
            if let Projection::Aggregate(agg) = projection {
                projected.insert(agg.column_name(), compute_aggregate(agg, &members));
            }
        }

        // HAVING filters groups.
        if let Some(having) = &query.having {
            if !evaluate_having(having, &projected, &members, ctx)? {
                continue;
            }
        }

        let representative = members.first().map(|r| r.hexad.id.clone());
        out.push((projected, representative));
    }
    Ok(out)
}

/// Evaluate a HAVING tree against one group: aggregate comparisons use the
/// group's members, other predicates use the group's first row.
fn evaluate_having(
    cond: &Condition,
    projected: &OutRow,
    members: &[&Row],
    ctx: &EvalContext,
) -> Result<bool, EngineError> {
    match cond {
        Condition::And(a, b) => Ok(evaluate_having(a, projected, members, ctx)?
            && evaluate_having(b, projected, members, ctx)?),
        Condition::Or(a, b) => Ok(evaluate_having(a, projected, members, ctx)?
            || evaluate_having(b, projected, members, ctx)?),
        Condition::Not(inner) => Ok(!evaluate_having(inner, projected, members, ctx)?),
        Condition::Pred(Predicate::CompareAggregate { agg, op, value, .. }) => {
            let actual = compute_aggregate(agg, members);
            Ok(op.eval(&actual, value))
        }
        Condition::Pred(_) => match members.first() {
            Some(row) => evaluate_condition(cond, row, ctx),
            None => Ok(false),
        },
    }
}

/// Compute one aggregate over a group.
fn compute_aggregate(agg: &Aggregate, members: &[&Row]) -> Value {
    let values: Vec<Value> = match &agg.arg {
        None => return Value::Int(members.len() as i64), // COUNT(*)
        Some(field) => members
            .iter()
            .map(|row| row.hexad.field(field.modality, &field.field))
            .filter(|v| !v.is_null())
            .collect(),
    };

    match agg.func {
        AggFunc::Count => Value::Int(values.len() as i64),
        AggFunc::Sum => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else if values.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(nums.iter().sum::<f64>() as i64)
            } else {
                Value::Float(nums.iter().sum())
            }
        }
        AggFunc::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggFunc::Min => values
            .iter()
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggFunc::Max => values
            .iter()
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verisim_model::{HexadBuilder, Modality};
    use verisim_vql::{parse, Statement, TypeChecker};

    fn typed(input: &str) -> TypedQuery {
        let Statement::Query(q) = parse(input).unwrap() else { panic!() };
        match TypeChecker::default().check_statement(Statement::Query(q)).unwrap() {
            verisim_vql::TypedStatement::Query(t) => t,
            _ => panic!(),
        }
    }

    fn doc_row(id: &str, name: &str, severity: i64) -> Row {
        Row::local(
            HexadBuilder::new(id)
                .with_document(name, "body")
                .with_document_field("name", Value::Str(name.to_string()))
                .with_document_field("severity", Value::Int(severity))
                .build(),
        )
    }

    #[test]
    fn test_assemble_rows_groups_by_hexad() {
        let scan_rows = vec![
            ScanRow {
                id: HexadId::new("a"),
                modality: Modality::Document,
                payload: verisim_model::ModalityPayload::Document {
                    title: "t".to_string(),
                    body: String::new(),
                    fields: BTreeMap::new(),
                },
                version: 2,
            },
            ScanRow {
                id: HexadId::new("a"),
                modality: Modality::Vector,
                payload: verisim_model::ModalityPayload::Vector {
                    embedding: vec![0.1],
                    model: None,
                },
                version: 1,
            },
        ];
        let rows = assemble_rows(scan_rows, Some("s1"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hexad.version(Modality::Document), 2);
        assert!(rows[0].hexad.has(Modality::Vector));
    }

    #[test]
    fn test_evaluate_cross_modal_exists() {
        let q = typed("SELECT * FROM STORE s WHERE TENSOR EXISTS");
        let row = doc_row("a", "x", 1);
        let ctx = EvalContext::default();
        assert!(!evaluate_condition(q.query.where_clause.as_ref().unwrap(), &row, &ctx).unwrap());
    }

    #[test]
    fn test_evaluate_drift_absent_modality_is_max() {
        let q = typed("SELECT * FROM STORE s WHERE DRIFT(DOCUMENT, VECTOR) > 0.9");
        let row = doc_row("a", "x", 1); // no vector: drift = 1.0
        let ctx = EvalContext::default();
        assert!(evaluate_condition(q.query.where_clause.as_ref().unwrap(), &row, &ctx).unwrap());
    }

    #[test]
    fn test_group_by_count_deterministic_order() {
        let q = typed(
            "SELECT DOCUMENT.name, COUNT(*) FROM STORE s GROUP BY DOCUMENT.name ORDER BY DOCUMENT.name ASC",
        );
        let rows = vec![
            doc_row("1", "b", 1),
            doc_row("2", "a", 1),
            doc_row("3", "a", 1),
            doc_row("4", "b", 1),
            doc_row("5", "a", 1),
        ];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["document.name"], Value::Str("a".to_string()));
        assert_eq!(out[0]["COUNT(*)"], Value::Int(3));
        assert_eq!(out[1]["document.name"], Value::Str("b".to_string()));
        assert_eq!(out[1]["COUNT(*)"], Value::Int(2));
    }

    #[test]
    fn test_having_filters_groups() {
        let q = typed(
            "SELECT DOCUMENT.name, COUNT(*) FROM STORE s GROUP BY DOCUMENT.name HAVING COUNT(*) > 2",
        );
        let rows = vec![
            doc_row("1", "a", 1),
            doc_row("2", "a", 1),
            doc_row("3", "a", 1),
            doc_row("4", "b", 1),
        ];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["document.name"], Value::Str("a".to_string()));
    }

    #[test]
    fn test_order_by_desc_with_tie_break() {
        let q = typed(
            "SELECT DOCUMENT.name, DOCUMENT.severity FROM STORE s ORDER BY DOCUMENT.severity DESC, DOCUMENT.name ASC",
        );
        let rows = vec![
            doc_row("z", "zed", 5),
            doc_row("a", "abe", 5),
            doc_row("m", "mid", 9),
        ];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert_eq!(out[0]["document.name"], Value::Str("mid".to_string()));
        // Severity tie: name ascending.
        assert_eq!(out[1]["document.name"], Value::Str("abe".to_string()));
        assert_eq!(out[2]["document.name"], Value::Str("zed".to_string()));
    }

    #[test]
    fn test_nulls_sort_last() {
        let q = typed("SELECT DOCUMENT.severity FROM STORE s ORDER BY DOCUMENT.severity ASC");
        let no_severity = Row::local(HexadBuilder::new("n").with_document("x", "b").build());
        let rows = vec![no_severity, doc_row("a", "a", 3), doc_row("b", "b", 1)];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert_eq!(out[0]["document.severity"], Value::Int(1));
        assert_eq!(out[1]["document.severity"], Value::Int(3));
        assert!(out[2]["document.severity"].is_null());
    }

    #[test]
    fn test_limit_zero_is_empty() {
        let q = typed("SELECT DOCUMENT.name FROM STORE s LIMIT 0");
        let rows = vec![doc_row("a", "a", 1)];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_offset_and_limit() {
        let q = typed("SELECT DOCUMENT.name FROM STORE s ORDER BY DOCUMENT.name ASC LIMIT 2 OFFSET 1");
        let rows = vec![doc_row("1", "a", 1), doc_row("2", "b", 1), doc_row("3", "c", 1), doc_row("4", "d", 1)];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["document.name"], Value::Str("b".to_string()));
        assert_eq!(out[1]["document.name"], Value::Str("c".to_string()));
    }

    #[test]
    fn test_execution_is_deterministic() {
        let q = typed("SELECT DOCUMENT.name FROM STORE s ORDER BY DOCUMENT.name ASC");
        let rows = || vec![doc_row("3", "c", 1), doc_row("1", "a", 1), doc_row("2", "b", 1)];
        let a = post_process(&q, rows(), &EvalContext::default()).unwrap();
        let b = post_process(&q, rows(), &EvalContext::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sum_avg_min_max() {
        let q = typed(
            "SELECT DOCUMENT.name, SUM(DOCUMENT.severity), AVG(DOCUMENT.severity), MIN(DOCUMENT.severity), MAX(DOCUMENT.severity) FROM STORE s GROUP BY DOCUMENT.name",
        );
        let rows = vec![doc_row("1", "a", 2), doc_row("2", "a", 4)];
        let out = post_process(&q, rows, &EvalContext::default()).unwrap();
        assert_eq!(out[0]["SUM(document.severity)"], Value::Int(6));
        assert_eq!(out[0]["AVG(document.severity)"], Value::Float(3.0));
        assert_eq!(out[0]["MIN(document.severity)"], Value::Int(2));
        assert_eq!(out[0]["MAX(document.severity)"], Value::Int(4));
    }
}
