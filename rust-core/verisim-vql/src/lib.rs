// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Query Language
//!
//! The VQL surface: lexer, recursive-descent parser, typed AST, and the
//! bidirectional type checker that produces proof obligations for
//! dependent-type queries. The parser is pure - no I/O, no state; malformed
//! input never silently succeeds.

use thiserror::Error;

mod ast;
mod check;
mod lexer;
mod parser;
mod schema;
mod types;

pub use ast::{
    AggFunc, Aggregate, Condition, DeleteStmt, DriftPolicy, FieldRef, InsertStmt, ModalityData,
    OrderKey, Predicate, ProofClause, ProofConnective, ProofSpec, Projection, Query, Source,
    Statement, UpdateStmt,
};
pub use check::{TypeChecker, TypedMutation, TypedQuery, TypedStatement};
pub use lexer::{tokenize, Span, Token, TokenKind};
pub use parser::parse;
pub use schema::{SchemaMode, SchemaRegistry};
pub use types::{OperandClass, VqlType};

/// What went wrong while parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    UnexpectedCharacter(char),
    UnterminatedString,
    InvalidEscape(char),
    InvalidNumber,
    UnexpectedToken { expected: String, found: String },
    UnexpectedEof { expected: String },
    EmptyProjection,
    UnknownKeyword(String),
    UnknownModality(String),
    UnknownProofKind(String),
    EmptyHexadId,
    TrailingInput,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character '{c}'"),
            ParseErrorKind::UnterminatedString => write!(f, "unterminated string literal"),
            ParseErrorKind::InvalidEscape(c) => write!(f, "invalid escape '\\{c}'"),
            ParseErrorKind::InvalidNumber => write!(f, "invalid numeric literal"),
            ParseErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            ParseErrorKind::UnexpectedEof { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            ParseErrorKind::EmptyProjection => write!(f, "SELECT list is empty"),
            ParseErrorKind::UnknownKeyword(k) => write!(f, "unknown keyword '{k}'"),
            ParseErrorKind::UnknownModality(m) => write!(f, "unknown modality '{m}'"),
            ParseErrorKind::UnknownProofKind(k) => write!(f, "unknown proof kind '{k}'"),
            ParseErrorKind::EmptyHexadId => write!(f, "HEXAD source requires a non-empty id"),
            ParseErrorKind::TrailingInput => write!(f, "trailing input after statement"),
        }
    }
}

/// A parse failure: kind, source span, one-line hint.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} at {span} ({hint})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    pub hint: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span, hint: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            hint: hint.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            ParseErrorKind::UnexpectedCharacter(_) => "parse/unexpected-character",
            ParseErrorKind::UnterminatedString => "parse/unterminated-string",
            ParseErrorKind::InvalidEscape(_) => "parse/invalid-escape",
            ParseErrorKind::InvalidNumber => "parse/invalid-number",
            ParseErrorKind::UnexpectedToken { .. } => "parse/unexpected-token",
            ParseErrorKind::UnexpectedEof { .. } => "parse/unexpected-eof",
            ParseErrorKind::EmptyProjection => "parse/empty-projection",
            ParseErrorKind::UnknownKeyword(_) => "parse/unknown-keyword",
            ParseErrorKind::UnknownModality(_) => "parse/unknown-modality",
            ParseErrorKind::UnknownProofKind(_) => "parse/unknown-proof-kind",
            ParseErrorKind::EmptyHexadId => "parse/empty-hexad-id",
            ParseErrorKind::TrailingInput => "parse/trailing-input",
        }
    }

    /// Parse errors are never retryable.
    pub fn recoverable(&self) -> bool {
        false
    }
}

/// What went wrong while type checking.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeErrorKind {
    HavingWithoutGroupBy,
    UnknownField {
        modality: verisim_model::Modality,
        field: String,
    },
    OperandMismatch {
        operator: String,
        expected: OperandClass,
        found: VqlType,
    },
    AggregateSourceMismatch {
        func: AggFunc,
        found: VqlType,
    },
    EmptyVectorLiteral,
    GroupByNotInSelect(String),
    ProjectionNotGrouped(String),
    OrderByNotProjected(String),
    AggregateInWhere,
    EmptyInsert,
    ValueMismatch {
        expected: VqlType,
        found: VqlType,
    },
    ModalityNotDeclared(verisim_model::Modality),
    IncompatibleProofComposition(String),
    ThresholdOutOfRange(f64),
    UnknownConsistencyMetric(String),
}

impl std::fmt::Display for TypeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeErrorKind::HavingWithoutGroupBy => write!(f, "HAVING requires GROUP BY"),
            TypeErrorKind::UnknownField { modality, field } => {
                write!(f, "unknown field {modality}.{field}")
            }
            TypeErrorKind::OperandMismatch { operator, expected, found } => {
                write!(f, "operator {operator} expects {expected:?} operands, found {found}")
            }
            TypeErrorKind::AggregateSourceMismatch { func, found } => {
                write!(f, "{} cannot aggregate {found}", func.as_str())
            }
            TypeErrorKind::EmptyVectorLiteral => write!(f, "vector literal has dimension 0"),
            TypeErrorKind::GroupByNotInSelect(col) => {
                write!(f, "GROUP BY column '{col}' is not in SELECT")
            }
            TypeErrorKind::ProjectionNotGrouped(col) => {
                write!(f, "projection '{col}' is neither grouped nor aggregated")
            }
            TypeErrorKind::AggregateInWhere => {
                write!(f, "aggregate comparisons belong in HAVING, not WHERE")
            }
            TypeErrorKind::EmptyInsert => {
                write!(f, "INSERT requires at least one non-empty modality payload")
            }
            TypeErrorKind::ValueMismatch { expected, found } => {
                write!(f, "expected a {expected} value, found {found}")
            }
            TypeErrorKind::OrderByNotProjected(col) => {
                write!(f, "ORDER BY column '{col}' is not projected or aggregated")
            }
            TypeErrorKind::ModalityNotDeclared(m) => {
                write!(f, "modality {m} is not declared by the SELECT list")
            }
            TypeErrorKind::IncompatibleProofComposition(msg) => {
                write!(f, "incompatible proof composition: {msg}")
            }
            TypeErrorKind::ThresholdOutOfRange(t) => {
                write!(f, "threshold {t} outside [0, 1]")
            }
            TypeErrorKind::UnknownConsistencyMetric(m) => {
                write!(f, "unknown consistency metric '{m}'")
            }
        }
    }
}

/// A type-check failure: kind, optional source span, one-line hint.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} ({hint})")]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Option<Span>,
    pub hint: String,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, span: Option<Span>, hint: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            hint: hint.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            TypeErrorKind::HavingWithoutGroupBy => "type/having-without-group-by",
            TypeErrorKind::UnknownField { .. } => "type/unknown-field",
            TypeErrorKind::OperandMismatch { .. } => "type/operand-mismatch",
            TypeErrorKind::AggregateSourceMismatch { .. } => "type/aggregate-source",
            TypeErrorKind::EmptyVectorLiteral => "type/empty-vector",
            TypeErrorKind::GroupByNotInSelect(_) => "type/group-by-not-in-select",
            TypeErrorKind::ProjectionNotGrouped(_) => "type/projection-not-grouped",
            TypeErrorKind::OrderByNotProjected(_) => "type/order-by-not-projected",
            TypeErrorKind::AggregateInWhere => "type/aggregate-in-where",
            TypeErrorKind::EmptyInsert => "type/empty-insert",
            TypeErrorKind::ValueMismatch { .. } => "type/value-mismatch",
            TypeErrorKind::ModalityNotDeclared(_) => "type/modality-not-declared",
            TypeErrorKind::IncompatibleProofComposition(_) => "type/proof-composition",
            TypeErrorKind::ThresholdOutOfRange(_) => "type/threshold-range",
            TypeErrorKind::UnknownConsistencyMetric(_) => "type/unknown-metric",
        }
    }

    /// Type errors are never retryable.
    pub fn recoverable(&self) -> bool {
        false
    }
}
