// SPDX-License-Identifier: PMPL-1.0-or-later
//! The VQL type system.
//!
//! Two primitive forms (base types and size-indexed vectors/tensors), the
//! dependent pair (Sigma) wrapping proved results, the dependent function
//! (Pi) for parametric obligations, plus modality and hexad types. The
//! checker synthesizes these bottom-up and checks them against expected
//! types top-down.

use serde::{Deserialize, Serialize};
use std::fmt;

use verisim_model::Modality;
use verisim_proof::ProofKind;

/// A VQL type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VqlType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Size-indexed vector; `dim: None` when the dimension is unknown.
    Vector { dim: Option<usize> },
    /// Shape-indexed tensor; `shape: None` when unknown.
    Tensor { shape: Option<Vec<usize>> },
    /// A whole modality's payload.
    Modality(Modality),
    /// A complete hexad.
    Hexad,
    /// A slipstream result: named, typed columns.
    QueryResult(Vec<(String, VqlType)>),
    /// Dependent pair: a result together with its proof certificates.
    Sigma {
        result: Box<VqlType>,
        proofs: Vec<(ProofKind, String)>,
    },
    /// Dependent function: a parametric obligation awaiting its index.
    Pi {
        param: String,
        body: Box<VqlType>,
    },
}

impl VqlType {
    /// Numeric types accept arithmetic aggregation (SUM/AVG).
    pub fn is_numeric(&self) -> bool {
        matches!(self, VqlType::Int | VqlType::Float)
    }

    /// Comparable types accept ordering operators and MIN/MAX.
    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            VqlType::Int | VqlType::Float | VqlType::String | VqlType::Timestamp | VqlType::Bool
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, VqlType::String)
    }
}

impl fmt::Display for VqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VqlType::String => write!(f, "String"),
            VqlType::Int => write!(f, "Int"),
            VqlType::Float => write!(f, "Float"),
            VqlType::Bool => write!(f, "Bool"),
            VqlType::Timestamp => write!(f, "Timestamp"),
            VqlType::Vector { dim: Some(d) } => write!(f, "Vector<{d}>"),
            VqlType::Vector { dim: None } => write!(f, "Vector<_>"),
            VqlType::Tensor { shape: Some(s) } => write!(f, "Tensor<{s:?}>"),
            VqlType::Tensor { shape: None } => write!(f, "Tensor<_>"),
            VqlType::Modality(m) => write!(f, "Modality<{m}>"),
            VqlType::Hexad => write!(f, "Hexad"),
            VqlType::QueryResult(cols) => {
                write!(f, "QueryResult<")?;
                for (i, (name, ty)) in cols.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, ">")
            }
            VqlType::Sigma { result, proofs } => {
                write!(f, "Σ({result}, ")?;
                for (i, (kind, contract)) in proofs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ∧ ")?;
                    }
                    write!(f, "Proof<{kind:?}, {contract}>")?;
                }
                write!(f, ")")
            }
            VqlType::Pi { param, body } => write!(f, "Π({param}). {body}"),
        }
    }
}

/// Operand classes for the per-operator validity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandClass {
    /// Int or Float.
    Numeric,
    /// Anything with a total order.
    Comparable,
    /// Strings only (CONTAINS, MATCHES).
    StringOnly,
    /// Size-indexed vectors (SIMILAR TO).
    VectorOnly,
}

impl OperandClass {
    /// Whether a type is admissible for this class.
    ///
    /// String admits the Numeric and Comparable classes as well: unknown
    /// fields type as String in permissive mode, and their runtime values
    /// coerce through the deterministic value order.
    pub fn admits(self, ty: &VqlType) -> bool {
        match self {
            OperandClass::Numeric => ty.is_numeric() || ty.is_string(),
            OperandClass::Comparable => ty.is_comparable(),
            OperandClass::StringOnly => ty.is_string(),
            OperandClass::VectorOnly => matches!(ty, VqlType::Vector { .. }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert!(OperandClass::Numeric.admits(&VqlType::Int));
        assert!(OperandClass::Numeric.admits(&VqlType::Float));
        assert!(OperandClass::Numeric.admits(&VqlType::String)); // permissive coercion
        assert!(!OperandClass::Numeric.admits(&VqlType::Bool));
        assert!(OperandClass::Comparable.admits(&VqlType::Timestamp));
        assert!(!OperandClass::StringOnly.admits(&VqlType::Int));
        assert!(OperandClass::VectorOnly.admits(&VqlType::Vector { dim: Some(3) }));
    }

    #[test]
    fn test_display() {
        let sigma = VqlType::Sigma {
            result: Box::new(VqlType::QueryResult(vec![(
                "document.title".to_string(),
                VqlType::String,
            )])),
            proofs: vec![(ProofKind::Existence, "presence".to_string())],
        };
        let s = sigma.to_string();
        assert!(s.contains("Σ"));
        assert!(s.contains("Proof<Existence, presence>"));
    }
}
