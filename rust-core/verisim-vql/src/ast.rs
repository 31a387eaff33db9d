// SPDX-License-Identifier: PMPL-1.0-or-later
//! The typed VQL AST.
//!
//! Produced by the parser, consumed by the checker and executor. Nodes carry
//! source spans so both parse and type errors can point at the offending
//! text.

use serde::{Deserialize, Serialize};

use verisim_model::{CmpOp, Modality, Value};
use verisim_proof::ProofKind;

use crate::lexer::Span;

/// A parsed VQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Query(Query),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

/// Drift policies for federated sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    Strict,
    Repair,
    #[default]
    Tolerate,
    Latest,
}

/// Data source of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    /// `HEXAD <id>`
    Hexad { id: String, span: Span },
    /// `FEDERATION <glob> [WITH DRIFT <policy>]`
    Federation {
        pattern: String,
        policy: DriftPolicy,
        span: Span,
    },
    /// `STORE <store-id>`
    Store { store_id: String, span: Span },
}

/// A `MOD.field` reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub modality: Modality,
    pub field: String,
    pub span: Span,
}

impl FieldRef {
    /// Column name as it appears in result rows, e.g. `document.title`.
    pub fn column_name(&self) -> String {
        format!("{}.{}", self.modality, self.field)
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn as_str(self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }
}

/// An aggregate expression: `COUNT(*)` or `FUNC(MOD.field)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub func: AggFunc,
    /// None for `COUNT(*)`.
    pub arg: Option<FieldRef>,
    pub span: Span,
}

impl Aggregate {
    /// Column name in result rows, e.g. `COUNT(*)` or `SUM(document.severity)`.
    pub fn column_name(&self) -> String {
        match &self.arg {
            None => format!("{}(*)", self.func.as_str()),
            Some(field) => format!("{}({})", self.func.as_str(), field.column_name()),
        }
    }
}

/// One SELECT projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// `*` - every modality the deployment configures.
    All { span: Span },
    /// A whole modality, e.g. `SEMANTIC`.
    Modality { modality: Modality, span: Span },
    /// `MOD.field`
    Field(FieldRef),
    /// An aggregate.
    Aggregate(Aggregate),
}

impl Projection {
    pub fn span(&self) -> Span {
        match self {
            Projection::All { span } | Projection::Modality { span, .. } => *span,
            Projection::Field(f) => f.span,
            Projection::Aggregate(a) => a.span,
        }
    }
}

/// A WHERE/HAVING condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Pred(Predicate),
}

/// Leaf predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `MOD.field op literal`
    Compare {
        field: FieldRef,
        op: CmpOp,
        value: Value,
        span: Span,
    },
    /// `MOD1.field op MOD2.field` (cross-modal when modalities differ).
    CompareFields {
        left: FieldRef,
        op: CmpOp,
        right: FieldRef,
        span: Span,
    },
    /// `MOD[.field] CONTAINS "text"`
    Contains {
        modality: Modality,
        field: Option<String>,
        needle: String,
        span: Span,
    },
    /// `MOD[.field] MATCHES "term term"`
    MatchesTerms {
        modality: Modality,
        field: Option<String>,
        terms: Vec<String>,
        span: Span,
    },
    /// `VECTOR SIMILAR TO [..] WITHIN t`
    SimilarTo {
        embedding: Vec<f32>,
        threshold: f64,
        span: Span,
    },
    /// Graph pattern `subj edge obj`; subject `_` means the owning hexad.
    GraphPattern {
        subject: Option<String>,
        edge: String,
        object: String,
        span: Span,
    },
    /// `DRIFT(MOD1, MOD2) op t`
    Drift {
        a: Modality,
        b: Modality,
        op: CmpOp,
        threshold: f64,
        span: Span,
    },
    /// `CONSISTENT(MOD1, MOD2) [USING metric] [op t]`
    Consistent {
        a: Modality,
        b: Modality,
        metric: String,
        op: CmpOp,
        threshold: f64,
        span: Span,
    },
    /// `AGG(...) op literal` - meaningful in HAVING, evaluated per group.
    CompareAggregate {
        agg: Aggregate,
        op: CmpOp,
        value: Value,
        span: Span,
    },
    /// `MOD EXISTS`
    Exists { modality: Modality, span: Span },
    /// `MOD NOT EXISTS`
    NotExists { modality: Modality, span: Span },
}

impl Predicate {
    pub fn span(&self) -> Span {
        match self {
            Predicate::Compare { span, .. }
            | Predicate::CompareFields { span, .. }
            | Predicate::Contains { span, .. }
            | Predicate::MatchesTerms { span, .. }
            | Predicate::SimilarTo { span, .. }
            | Predicate::GraphPattern { span, .. }
            | Predicate::CompareAggregate { span, .. }
            | Predicate::Drift { span, .. }
            | Predicate::Consistent { span, .. }
            | Predicate::Exists { span, .. }
            | Predicate::NotExists { span, .. } => *span,
        }
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    /// Column name: a projected `mod.field` or aggregate name.
    pub column: String,
    pub ascending: bool,
    pub span: Span,
}

/// A proof spec from the PROOF clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofSpec {
    pub kind: ProofKind,
    pub contract: String,
    pub span: Span,
}

/// Connective joining two adjacent proof specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofConnective {
    And,
    Or,
}

/// The PROOF clause: the first spec, then (connective, spec) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofClause {
    pub first: ProofSpec,
    pub rest: Vec<(ProofConnective, ProofSpec)>,
}

impl ProofClause {
    /// Alternative groups: `OR` chains collapse into one group, `AND`
    /// starts a new group.
    pub fn groups(&self) -> Vec<Vec<&ProofSpec>> {
        let mut groups = vec![vec![&self.first]];
        for (conn, spec) in &self.rest {
            match conn {
                ProofConnective::Or => groups.last_mut().unwrap().push(spec),
                ProofConnective::And => groups.push(vec![spec]),
            }
        }
        groups
    }

    pub fn specs(&self) -> impl Iterator<Item = &ProofSpec> {
        std::iter::once(&self.first).chain(self.rest.iter().map(|(_, s)| s))
    }
}

/// A SELECT query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub projections: Vec<Projection>,
    pub source: Source,
    pub where_clause: Option<Condition>,
    pub group_by: Vec<FieldRef>,
    pub having: Option<Condition>,
    pub proof: Option<ProofClause>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Payload data for one modality of an INSERT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityData {
    pub modality: Modality,
    /// Field assignments in source order.
    pub fields: Vec<(String, Value)>,
    pub span: Span,
}

/// `INSERT HEXAD WITH <mod_data_list> [PROOF ...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertStmt {
    pub data: Vec<ModalityData>,
    pub proof: Option<ProofClause>,
}

/// `UPDATE HEXAD <id> SET <set_list> [PROOF ...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStmt {
    pub id: String,
    pub sets: Vec<(FieldRef, Value)>,
    pub proof: Option<ProofClause>,
}

/// `DELETE HEXAD <id> [PROOF ...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStmt {
    pub id: String,
    pub proof: Option<ProofClause>,
}
