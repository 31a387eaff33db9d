// SPDX-License-Identifier: PMPL-1.0-or-later
//! Bidirectional type checker.
//!
//! Two modes over the AST: *synthesize* walks a node and infers its type,
//! *check* verifies a node against an expected type. Queries synthesize to
//! `QueryResult<...>` on the slipstream path or `Σ(QueryResult<...>, Proof
//! ...)` when PROOF obligations are present; mutations check their values
//! against the schema registry.

use std::collections::HashSet;
use tracing::debug;

use verisim_model::{CmpOp, Modality, Value};
use verisim_proof::{ObligationPlan, ProofKind, ProofObligation};

use crate::ast::*;
use crate::schema::{SchemaMode, SchemaRegistry};
use crate::types::{OperandClass, VqlType};
use crate::{TypeError, TypeErrorKind};

/// A checked query ready for execution.
#[derive(Debug, Clone)]
pub struct TypedQuery {
    pub query: Query,
    /// Result columns in projection order.
    pub columns: Vec<(String, VqlType)>,
    /// `QueryResult<...>` or `Σ(QueryResult<...>, ...)`.
    pub result_type: VqlType,
    /// Composed proof plan for dependent-type queries.
    pub proof_plan: Option<ObligationPlan>,
    /// Modalities declared by the SELECT list.
    pub declared_modalities: Vec<Modality>,
    /// Declared modalities plus those the WHERE clause touches - the set the
    /// executor must fetch.
    pub required_modalities: Vec<Modality>,
}

/// A checked mutation.
#[derive(Debug, Clone)]
pub struct TypedMutation {
    pub statement: Statement,
    pub proof_plan: Option<ObligationPlan>,
}

/// Result of checking any statement.
#[derive(Debug, Clone)]
pub enum TypedStatement {
    Query(TypedQuery),
    Mutation(TypedMutation),
}

/// The type checker. Holds the schema registry and the set of Custom
/// contracts that advertise disjoint composability.
#[derive(Debug, Clone, Default)]
pub struct TypeChecker {
    schema: SchemaRegistry,
    non_composable_contracts: HashSet<String>,
}

impl TypeChecker {
    pub fn new(schema: SchemaRegistry) -> Self {
        Self {
            schema,
            non_composable_contracts: HashSet::new(),
        }
    }

    /// Mark a Custom contract as non-composable: listing it alongside any
    /// other proof spec is a type error.
    pub fn with_non_composable(mut self, contract: impl Into<String>) -> Self {
        self.non_composable_contracts.insert(contract.into());
        self
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Check a parsed statement.
    pub fn check_statement(&self, statement: Statement) -> Result<TypedStatement, TypeError> {
        match statement {
            Statement::Query(query) => Ok(TypedStatement::Query(self.check_query(query)?)),
            Statement::Insert(insert) => {
                let plan = self.check_insert(&insert)?;
                Ok(TypedStatement::Mutation(TypedMutation {
                    statement: Statement::Insert(insert),
                    proof_plan: plan,
                }))
            }
            Statement::Update(update) => {
                let plan = self.check_update(&update)?;
                Ok(TypedStatement::Mutation(TypedMutation {
                    statement: Statement::Update(update),
                    proof_plan: plan,
                }))
            }
            Statement::Delete(delete) => {
                let plan = self.check_proof_clause(delete.proof.as_ref())?;
                Ok(TypedStatement::Mutation(TypedMutation {
                    statement: Statement::Delete(delete),
                    proof_plan: plan,
                }))
            }
        }
    }

    // -- queries -----------------------------------------------------------

    /// Synthesize a query's type.
    pub fn check_query(&self, query: Query) -> Result<TypedQuery, TypeError> {
        // 1. Declared modalities; `*` expands to the configured set.
        let declared_modalities = declared_modalities(&query.projections);

        // 2. The parser guarantees a non-empty hexad id; nothing further to
        //    validate on the source here.

        // 3. WHERE: every condition's operands must fit its operator.
        if let Some(cond) = &query.where_clause {
            self.check_condition(cond, false)?;
        }

        // 4-5. Projections and aggregates.
        let mut columns: Vec<(String, VqlType)> = Vec::new();
        for projection in &query.projections {
            match projection {
                Projection::All { .. } => {
                    for m in Modality::ALL {
                        columns.push((m.to_string(), VqlType::Modality(m)));
                    }
                }
                Projection::Modality { modality, .. } => {
                    columns.push((modality.to_string(), VqlType::Modality(*modality)));
                }
                Projection::Field(field) => {
                    let ty = self.synth_field(field)?;
                    columns.push((field.column_name(), ty));
                }
                Projection::Aggregate(agg) => {
                    let ty = self.synth_aggregate(agg)?;
                    columns.push((agg.column_name(), ty));
                }
            }
        }

        // 6. GROUP BY must reference SELECT columns; conversely every plain
        //    projection must be grouped or aggregated.
        let column_names: HashSet<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        if !query.group_by.is_empty() {
            for key in &query.group_by {
                if !column_names.contains(key.column_name().as_str()) {
                    return Err(TypeError::new(
                        TypeErrorKind::GroupByNotInSelect(key.column_name()),
                        Some(key.span),
                        "add the column to the SELECT list",
                    ));
                }
            }
            let grouped: HashSet<String> =
                query.group_by.iter().map(|k| k.column_name()).collect();
            for projection in &query.projections {
                if let Projection::Field(field) = projection {
                    if !grouped.contains(&field.column_name()) {
                        return Err(TypeError::new(
                            TypeErrorKind::ProjectionNotGrouped(field.column_name()),
                            Some(field.span),
                            "group by the column or wrap it in an aggregate",
                        ));
                    }
                }
            }
        }

        // ORDER BY keys must be projected or aggregated.
        for key in &query.order_by {
            if !column_names.contains(key.column.as_str()) {
                return Err(TypeError::new(
                    TypeErrorKind::OrderByNotProjected(key.column.clone()),
                    Some(key.span),
                    "order only by projected columns or aggregates",
                ));
            }
        }

        // 7. HAVING requires GROUP BY.
        if query.having.is_some() && query.group_by.is_empty() {
            return Err(TypeError::new(
                TypeErrorKind::HavingWithoutGroupBy,
                None,
                "add a GROUP BY clause or move the condition to WHERE",
            ));
        }
        if let Some(cond) = &query.having {
            self.check_condition(cond, true)?;
        }

        // 8. Compose the proof plan.
        let proof_plan = self.check_proof_clause(query.proof.as_ref())?;

        // 9. Synthesized query type.
        let result = VqlType::QueryResult(columns.clone());
        let result_type = match &proof_plan {
            None => result,
            Some(plan) => VqlType::Sigma {
                result: Box::new(result),
                proofs: plan
                    .obligations()
                    .map(|o| (o.kind, o.contract.clone()))
                    .collect(),
            },
        };

        let mut required_modalities = declared_modalities.clone();
        if let Some(cond) = &query.where_clause {
            for m in condition_modalities(cond) {
                if !required_modalities.contains(&m) {
                    required_modalities.push(m);
                }
            }
        }

        debug!(%result_type, "query checked");

        Ok(TypedQuery {
            query,
            columns,
            result_type,
            proof_plan,
            declared_modalities,
            required_modalities,
        })
    }

    fn check_condition(&self, cond: &Condition, in_having: bool) -> Result<(), TypeError> {
        match cond {
            Condition::And(a, b) | Condition::Or(a, b) => {
                self.check_condition(a, in_having)?;
                self.check_condition(b, in_having)
            }
            Condition::Not(inner) => self.check_condition(inner, in_having),
            Condition::Pred(pred) => self.check_predicate(pred, in_having),
        }
    }

    fn check_predicate(&self, pred: &Predicate, in_having: bool) -> Result<(), TypeError> {
        match pred {
            Predicate::Compare { field, op, value, span } => {
                let field_ty = self.synth_field(field)?;
                let value_ty = synth_literal(value);
                self.check_operator(*op, &field_ty, &value_ty, *span)
            }
            Predicate::CompareFields { left, op, right, span } => {
                let lt = self.synth_field(left)?;
                let rt = self.synth_field(right)?;
                self.check_operator(*op, &lt, &rt, *span)
            }
            Predicate::Contains { modality, field, span, .. }
            | Predicate::MatchesTerms { modality, field, span, .. } => {
                // String-only: a named field must be string-typed; whole-
                // modality text search is admitted for any payload.
                if let Some(field) = field {
                    let ty = self.synth_field(&FieldRef {
                        modality: *modality,
                        field: field.clone(),
                        span: *span,
                    })?;
                    if !ty.is_string() {
                        return Err(TypeError::new(
                            TypeErrorKind::OperandMismatch {
                                operator: "CONTAINS".to_string(),
                                expected: OperandClass::StringOnly,
                                found: ty,
                            },
                            Some(*span),
                            "full-text operators apply to string fields",
                        ));
                    }
                }
                Ok(())
            }
            Predicate::SimilarTo { embedding, threshold, span } => {
                if embedding.is_empty() {
                    return Err(TypeError::new(
                        TypeErrorKind::EmptyVectorLiteral,
                        Some(*span),
                        "a similarity probe needs at least one component",
                    ));
                }
                check_threshold(*threshold, *span)
            }
            Predicate::GraphPattern { .. } => Ok(()),
            Predicate::Drift { threshold, span, .. } => check_threshold(*threshold, *span),
            Predicate::Consistent { metric, threshold, span, .. } => {
                if metric.parse::<ConsistencyMetricName>().is_err() {
                    return Err(TypeError::new(
                        TypeErrorKind::UnknownConsistencyMetric(metric.clone()),
                        Some(*span),
                        "metrics: COSINE, EUCLIDEAN, DOT_PRODUCT, JACCARD",
                    ));
                }
                check_threshold(*threshold, *span)
            }
            Predicate::CompareAggregate { agg, op, value, span } => {
                if !in_having {
                    return Err(TypeError::new(
                        TypeErrorKind::AggregateInWhere,
                        Some(*span),
                        "WHERE filters rows; HAVING filters groups",
                    ));
                }
                let agg_ty = self.synth_aggregate(agg)?;
                let value_ty = synth_literal(value);
                self.check_operator(*op, &agg_ty, &value_ty, *span)
            }
            Predicate::Exists { .. } | Predicate::NotExists { .. } => Ok(()),
        }
    }

    /// Per-operator operand table: equality takes any comparable pair,
    /// ordering takes numeric (or permissively-string) operands.
    fn check_operator(
        &self,
        op: CmpOp,
        left: &VqlType,
        right: &VqlType,
        span: crate::lexer::Span,
    ) -> Result<(), TypeError> {
        let class = match op {
            CmpOp::Eq | CmpOp::Ne => OperandClass::Comparable,
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => OperandClass::Numeric,
        };
        for ty in [left, right] {
            if !class.admits(ty) {
                return Err(TypeError::new(
                    TypeErrorKind::OperandMismatch {
                        operator: op.as_str().to_string(),
                        expected: class,
                        found: ty.clone(),
                    },
                    Some(span),
                    "see the operator's operand table",
                ));
            }
        }
        Ok(())
    }

    /// Synthesize a field reference's type from the schema registry.
    fn synth_field(&self, field: &FieldRef) -> Result<VqlType, TypeError> {
        self.schema
            .field_type(field.modality, &field.field)
            .ok_or_else(|| {
                TypeError::new(
                    TypeErrorKind::UnknownField {
                        modality: field.modality,
                        field: field.field.clone(),
                    },
                    Some(field.span),
                    "declare the field in the schema registry, or use permissive mode",
                )
            })
    }

    /// Aggregate typing: SUM/AVG need numeric sources, MIN/MAX comparable,
    /// COUNT anything. AVG yields Float; the others preserve the source type.
    fn synth_aggregate(&self, agg: &Aggregate) -> Result<VqlType, TypeError> {
        let source_ty = match &agg.arg {
            None => None,
            Some(field) => Some(self.synth_field(field)?),
        };
        match agg.func {
            AggFunc::Count => Ok(VqlType::Int),
            AggFunc::Sum | AggFunc::Avg => {
                let ty = source_ty.unwrap_or(VqlType::Int);
                let numeric_enough = ty.is_numeric()
                    || (self.schema.mode() == SchemaMode::Permissive && ty.is_string());
                if !numeric_enough {
                    return Err(TypeError::new(
                        TypeErrorKind::AggregateSourceMismatch {
                            func: agg.func,
                            found: ty,
                        },
                        Some(agg.span),
                        "SUM and AVG aggregate numeric fields",
                    ));
                }
                if agg.func == AggFunc::Avg {
                    Ok(VqlType::Float)
                } else {
                    Ok(ty)
                }
            }
            AggFunc::Min | AggFunc::Max => {
                let ty = source_ty.unwrap_or(VqlType::Int);
                if !ty.is_comparable() {
                    return Err(TypeError::new(
                        TypeErrorKind::AggregateSourceMismatch {
                            func: agg.func,
                            found: ty,
                        },
                        Some(agg.span),
                        "MIN and MAX aggregate comparable fields",
                    ));
                }
                Ok(ty)
            }
        }
    }

    // -- proofs ------------------------------------------------------------

    /// Generate one obligation per listed proof spec and compose the plan.
    fn check_proof_clause(
        &self,
        clause: Option<&ProofClause>,
    ) -> Result<Option<ObligationPlan>, TypeError> {
        let Some(clause) = clause else {
            return Ok(None);
        };

        // Composability gate: a non-composable Custom contract may not be
        // combined with any other spec.
        let total = clause.specs().count();
        if total > 1 {
            for spec in clause.specs() {
                if spec.kind == ProofKind::Custom
                    && self.non_composable_contracts.contains(&spec.contract)
                {
                    return Err(TypeError::new(
                        TypeErrorKind::IncompatibleProofComposition(format!(
                            "custom contract '{}' advertises disjoint composability",
                            spec.contract
                        )),
                        Some(spec.span),
                        "verify this contract in its own query",
                    ));
                }
            }
        }

        let groups: Vec<Vec<ProofObligation>> = clause
            .groups()
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .map(|spec| ProofObligation::new(spec.kind, spec.contract.clone()))
                    .collect()
            })
            .collect();

        Ok(Some(ObligationPlan::compose(groups)))
    }

    // -- mutations ---------------------------------------------------------

    fn check_insert(&self, insert: &InsertStmt) -> Result<Option<ObligationPlan>, TypeError> {
        if insert.data.iter().all(|d| d.fields.is_empty()) {
            return Err(TypeError::new(
                TypeErrorKind::EmptyInsert,
                insert.data.first().map(|d| d.span),
                "give at least one modality a payload",
            ));
        }
        for data in &insert.data {
            for (field, value) in &data.fields {
                match self.schema.declared_field_type(data.modality, field) {
                    Some(expected) => self.check_value(value, &expected, data.span)?,
                    None if self.schema.mode() == SchemaMode::Strict => {
                        return Err(TypeError::new(
                            TypeErrorKind::UnknownField {
                                modality: data.modality,
                                field: field.clone(),
                            },
                            Some(data.span),
                            "declare the field in the schema registry",
                        ));
                    }
                    // Permissive mode: undeclared fields take any literal.
                    None => {}
                }
            }
        }
        self.check_proof_clause(insert.proof.as_ref())
    }

    fn check_update(&self, update: &UpdateStmt) -> Result<Option<ObligationPlan>, TypeError> {
        for (field, value) in &update.sets {
            match self.schema.declared_field_type(field.modality, &field.field) {
                Some(expected) => self.check_value(value, &expected, field.span)?,
                None if self.schema.mode() == SchemaMode::Strict => {
                    return Err(TypeError::new(
                        TypeErrorKind::UnknownField {
                            modality: field.modality,
                            field: field.field.clone(),
                        },
                        Some(field.span),
                        "declare the field in the schema registry",
                    ));
                }
                None => {}
            }
        }
        self.check_proof_clause(update.proof.as_ref())
    }

    /// Check mode: verify a literal conforms to an expected type.
    fn check_value(
        &self,
        value: &Value,
        expected: &VqlType,
        span: crate::lexer::Span,
    ) -> Result<(), TypeError> {
        let found = synth_literal(value);
        let ok = match expected {
            VqlType::String => matches!(found, VqlType::String),
            VqlType::Int => matches!(found, VqlType::Int),
            // Ints widen to Float.
            VqlType::Float => matches!(found, VqlType::Int | VqlType::Float),
            VqlType::Bool => matches!(found, VqlType::Bool),
            VqlType::Timestamp => matches!(found, VqlType::Timestamp | VqlType::String),
            VqlType::Vector { dim } => match (&found, dim) {
                (VqlType::Vector { dim: Some(0) }, _) => false,
                (VqlType::Vector { dim: Some(d) }, Some(want)) => d == want,
                (VqlType::Vector { .. }, None) => true,
                _ => false,
            },
            // Everything else accepts any literal (permissive payloads).
            _ => true,
        };
        if ok {
            Ok(())
        } else {
            Err(TypeError::new(
                TypeErrorKind::ValueMismatch {
                    expected: expected.clone(),
                    found,
                },
                Some(span),
                "the field's declared type fixes the literal's form",
            ))
        }
    }
}

/// Synthesize a literal's type.
fn synth_literal(value: &Value) -> VqlType {
    match value {
        Value::Null => VqlType::String, // NULL compares as absent at runtime
        Value::Bool(_) => VqlType::Bool,
        Value::Int(_) => VqlType::Int,
        Value::Float(_) => VqlType::Float,
        Value::Str(_) => VqlType::String,
        Value::Vector(v) => VqlType::Vector { dim: Some(v.len()) },
        Value::Timestamp(_) => VqlType::Timestamp,
    }
}

fn check_threshold(threshold: f64, span: crate::lexer::Span) -> Result<(), TypeError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(TypeError::new(
            TypeErrorKind::ThresholdOutOfRange(threshold),
            Some(span),
            "drift and similarity scores live in [0, 1]",
        ))
    }
}

/// Modalities declared by the SELECT list; `*` expands to the full set.
fn declared_modalities(projections: &[Projection]) -> Vec<Modality> {
    let mut out = Vec::new();
    let mut push = |m: Modality| {
        if !out.contains(&m) {
            out.push(m);
        }
    };
    for projection in projections {
        match projection {
            Projection::All { .. } => {
                for m in Modality::ALL {
                    push(m);
                }
            }
            Projection::Modality { modality, .. } => push(*modality),
            Projection::Field(field) => push(field.modality),
            Projection::Aggregate(agg) => {
                if let Some(field) = &agg.arg {
                    push(field.modality);
                }
            }
        }
    }
    out
}

/// Modalities referenced anywhere in a condition tree.
fn condition_modalities(cond: &Condition) -> Vec<Modality> {
    let mut out = Vec::new();
    collect_condition_modalities(cond, &mut out);
    out
}

fn collect_condition_modalities(cond: &Condition, out: &mut Vec<Modality>) {
    let mut push = |m: Modality| {
        if !out.contains(&m) {
            out.push(m);
        }
    };
    match cond {
        Condition::And(a, b) | Condition::Or(a, b) => {
            collect_condition_modalities(a, out);
            collect_condition_modalities(b, out);
        }
        Condition::Not(inner) => collect_condition_modalities(inner, out),
        Condition::Pred(pred) => match pred {
            Predicate::Compare { field, .. } => push(field.modality),
            Predicate::CompareFields { left, right, .. } => {
                push(left.modality);
                push(right.modality);
            }
            Predicate::Contains { modality, .. } | Predicate::MatchesTerms { modality, .. } => {
                push(*modality)
            }
            Predicate::SimilarTo { .. } => push(Modality::Vector),
            Predicate::GraphPattern { .. } => push(Modality::Graph),
            Predicate::Drift { a, b, .. } | Predicate::Consistent { a, b, .. } => {
                push(*a);
                push(*b);
            }
            Predicate::CompareAggregate { agg, .. } => {
                if let Some(field) = &agg.arg {
                    push(field.modality);
                }
            }
            Predicate::Exists { modality, .. } | Predicate::NotExists { modality, .. } => {
                push(*modality)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(input: &str) -> Result<TypedStatement, TypeError> {
        let checker = TypeChecker::default();
        let stmt = parse(input).expect("parse failed");
        checker.check_statement(stmt)
    }

    fn check_query(input: &str) -> Result<TypedQuery, TypeError> {
        match check(input)? {
            TypedStatement::Query(q) => Ok(q),
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_slipstream_type() {
        let q = check_query("SELECT DOCUMENT.title FROM HEXAD ent-1").unwrap();
        assert!(matches!(q.result_type, VqlType::QueryResult(_)));
        assert_eq!(q.columns[0].0, "document.title");
        assert_eq!(q.columns[0].1, VqlType::String);
        assert!(q.proof_plan.is_none());
    }

    #[test]
    fn test_dependent_type_is_sigma() {
        let q = check_query(
            "SELECT SEMANTIC FROM HEXAD ent-1 PROOF EXISTENCE(presence) AND INTEGRITY(tamper-free)",
        )
        .unwrap();
        let VqlType::Sigma { proofs, .. } = &q.result_type else {
            panic!("expected Σ type, got {}", q.result_type);
        };
        assert_eq!(proofs.len(), 2);
        let plan = q.proof_plan.unwrap();
        assert_eq!(plan.strategy, verisim_proof::PlanStrategy::Independent);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_citation_provenance_sequential() {
        let q = check_query(
            "SELECT SEMANTIC FROM HEXAD ent-1 PROOF PROVENANCE(chain) AND CITATION(cited)",
        )
        .unwrap();
        let plan = q.proof_plan.unwrap();
        assert_eq!(plan.strategy, verisim_proof::PlanStrategy::Sequential);
        assert_eq!(plan.groups[0][0].kind, ProofKind::Citation);
    }

    #[test]
    fn test_non_composable_custom_rejected() {
        let checker = TypeChecker::default().with_non_composable("island");
        let stmt = parse("SELECT SEMANTIC FROM HEXAD e PROOF CUSTOM(island) AND EXISTENCE(p)").unwrap();
        let err = checker.check_statement(stmt).unwrap_err();
        assert_eq!(err.code(), "type/proof-composition");

        // Alone it is fine.
        let stmt = parse("SELECT SEMANTIC FROM HEXAD e PROOF CUSTOM(island)").unwrap();
        assert!(checker.check_statement(stmt).is_ok());
    }

    #[test]
    fn test_having_without_group_by() {
        let err = check_query("SELECT DOCUMENT.name FROM STORE s HAVING COUNT(*) > 1").unwrap_err();
        assert_eq!(err.code(), "type/having-without-group-by");
    }

    #[test]
    fn test_empty_vector_literal_is_type_error() {
        let err = check_query("SELECT * FROM STORE s WHERE VECTOR SIMILAR TO [] WITHIN 0.5").unwrap_err();
        assert_eq!(err.code(), "type/empty-vector");
    }

    #[test]
    fn test_aggregate_in_where_rejected() {
        let err = check_query("SELECT DOCUMENT.name FROM STORE s WHERE COUNT(*) > 1").unwrap_err();
        assert_eq!(err.code(), "type/aggregate-in-where");
    }

    #[test]
    fn test_group_by_must_be_selected() {
        let err = check_query(
            "SELECT COUNT(*) FROM STORE s GROUP BY DOCUMENT.name",
        )
        .unwrap_err();
        assert_eq!(err.code(), "type/group-by-not-in-select");
    }

    #[test]
    fn test_ungrouped_projection_rejected() {
        let err = check_query(
            "SELECT DOCUMENT.name, DOCUMENT.title, COUNT(*) FROM STORE s GROUP BY DOCUMENT.name",
        )
        .unwrap_err();
        assert_eq!(err.code(), "type/projection-not-grouped");
    }

    #[test]
    fn test_order_by_must_be_projected() {
        let err = check_query(
            "SELECT DOCUMENT.name FROM STORE s ORDER BY DOCUMENT.other ASC",
        )
        .unwrap_err();
        assert_eq!(err.code(), "type/order-by-not-projected");
    }

    #[test]
    fn test_avg_yields_float_count_int() {
        let q = check_query(
            "SELECT DOCUMENT.name, COUNT(*), AVG(DOCUMENT.severity) FROM STORE s GROUP BY DOCUMENT.name",
        )
        .unwrap();
        assert_eq!(q.columns[1].1, VqlType::Int);
        assert_eq!(q.columns[2].1, VqlType::Float);
    }

    #[test]
    fn test_strict_mode_rejects_unknown_fields() {
        let checker = TypeChecker::new(SchemaRegistry::new(SchemaMode::Strict));
        let stmt = parse("SELECT DOCUMENT.undeclared FROM HEXAD e").unwrap();
        let err = checker.check_statement(stmt).unwrap_err();
        assert_eq!(err.code(), "type/unknown-field");
    }

    #[test]
    fn test_drift_threshold_range() {
        let err = check_query("SELECT * FROM STORE s WHERE DRIFT(DOCUMENT, VECTOR) > 1.5").unwrap_err();
        assert_eq!(err.code(), "type/threshold-range");
    }

    #[test]
    fn test_unknown_metric() {
        let err = check_query(
            "SELECT * FROM STORE s WHERE CONSISTENT(DOCUMENT, VECTOR) USING MANHATTAN",
        )
        .unwrap_err();
        assert_eq!(err.code(), "type/unknown-metric");
    }

    #[test]
    fn test_required_modalities_include_where() {
        let q = check_query(
            "SELECT DOCUMENT.title FROM STORE s WHERE TENSOR EXISTS AND DRIFT(GRAPH, VECTOR) > 0.2",
        )
        .unwrap();
        assert_eq!(q.declared_modalities, vec![Modality::Document]);
        assert!(q.required_modalities.contains(&Modality::Tensor));
        assert!(q.required_modalities.contains(&Modality::Graph));
        assert!(q.required_modalities.contains(&Modality::Vector));
    }

    #[test]
    fn test_update_value_checked_against_schema() {
        let mut schema = SchemaRegistry::default();
        schema.declare(Modality::Document, "severity", VqlType::Int);
        let checker = TypeChecker::new(schema);

        let stmt = parse("UPDATE HEXAD e SET DOCUMENT.severity = \"high\"").unwrap();
        let err = checker.check_statement(stmt).unwrap_err();
        assert_eq!(err.code(), "type/value-mismatch");

        let stmt = parse("UPDATE HEXAD e SET DOCUMENT.severity = 7").unwrap();
        assert!(checker.check_statement(stmt).is_ok());
    }

    #[test]
    fn test_permissive_insert_accepts_undeclared_fields() {
        assert!(check("INSERT HEXAD WITH DOCUMENT { title: \"X\", severity: 5 }").is_ok());
    }

    #[test]
    fn test_strict_insert_rejects_undeclared_fields() {
        let checker = TypeChecker::new(SchemaRegistry::new(SchemaMode::Strict));
        let stmt = parse("INSERT HEXAD WITH DOCUMENT { title: \"X\", severity: 5 }").unwrap();
        let err = checker.check_statement(stmt).unwrap_err();
        assert_eq!(err.code(), "type/unknown-field");
    }

    #[test]
    fn test_empty_insert_rejected() {
        let err = match check("INSERT HEXAD WITH DOCUMENT { }") {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.code(), "type/empty-insert");
    }

    #[test]
    fn test_mutation_with_proof_gets_plan() {
        let TypedStatement::Mutation(m) =
            check("DELETE HEXAD ent-1 PROOF ACCESS(owner)").unwrap()
        else {
            panic!()
        };
        assert!(m.proof_plan.is_some());
    }
}

/// Metric-name validation shared with the executor's metric parsing.
struct ConsistencyMetricName;

impl std::str::FromStr for ConsistencyMetricName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "COSINE" | "EUCLIDEAN" | "DOT_PRODUCT" | "JACCARD" => Ok(ConsistencyMetricName),
            _ => Err(()),
        }
    }
}
