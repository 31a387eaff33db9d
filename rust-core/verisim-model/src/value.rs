// SPDX-License-Identifier: PMPL-1.0-or-later
//! Scalar values flowing through queries and payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A typed scalar (or small vector) value.
///
/// This is the executor's field currency: projections, comparisons, GROUP BY
/// keys, and aggregate inputs all operate on `Value`. The ordering is total
/// and deterministic - within a type values compare naturally, across types
/// a fixed rank applies, and `Null` sorts after everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vector(Vec<f32>),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// True when the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view, unifying Int and Float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Rank used for cross-type ordering. Null ranks last.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Str(_) => 2,
            Value::Timestamp(_) => 3,
            Value::Vector(_) => 4,
            Value::Null => u8::MAX,
        }
    }

    /// Total, deterministic ordering. Nulls sort last; Int and Float compare
    /// numerically; NaN floats sort after finite floats.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Vector(a), Value::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.type_rank().cmp(&other.type_rank()),
            },
        }
    }

    /// Equality for predicates: numeric across Int/Float, strict otherwise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self.total_cmp(other) == Ordering::Equal,
        }
    }
}

/// Comparison operators shared by the query language and the store
/// pushdown interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Evaluate the operator over two values with the deterministic total
    /// order. Comparisons against `Null` are false except `Ne`.
    pub fn eval(self, left: &Value, right: &Value) -> bool {
        if left.is_null() || right.is_null() {
            return matches!(self, CmpOp::Ne) && !(left.is_null() && right.is_null());
        }
        let ord = left.total_cmp(right);
        match self {
            CmpOp::Eq => left.loose_eq(right),
            CmpOp::Ne => !left.loose_eq(right),
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }

    /// Surface syntax for error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Vector(v) => write!(f, "vec[{}]", v.len()),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_last() {
        let mut values = vec![Value::Null, Value::Int(2), Value::Str("a".into()), Value::Int(1)];
        values.sort_by(|a, b| a.total_cmp(b));
        assert!(values.last().unwrap().is_null());
        assert_eq!(values[0], Value::Int(1));
    }

    #[test]
    fn test_numeric_cross_type_compare() {
        assert_eq!(Value::Int(3).total_cmp(&Value::Float(3.0)), Ordering::Equal);
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert!(Value::Int(5).loose_eq(&Value::Float(5.0)));
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let a = Value::Float(f64::NAN);
        let b = Value::Float(1.0);
        // NaN has a fixed place via total_cmp - both directions agree.
        assert_eq!(a.total_cmp(&b), b.total_cmp(&a).reverse());
    }

    #[test]
    fn test_cmp_op_null_semantics() {
        assert!(!CmpOp::Eq.eval(&Value::Null, &Value::Int(1)));
        assert!(!CmpOp::Gt.eval(&Value::Null, &Value::Int(1)));
        assert!(CmpOp::Ne.eval(&Value::Null, &Value::Int(1)));
        assert!(!CmpOp::Ne.eval(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_cmp_op_numeric() {
        assert!(CmpOp::Gt.eval(&Value::Int(5), &Value::Int(3)));
        assert!(CmpOp::Ge.eval(&Value::Float(3.0), &Value::Int(3)));
        assert!(CmpOp::Lt.eval(&Value::Int(2), &Value::Float(2.5)));
    }

    #[test]
    fn test_vector_lexicographic() {
        let a = Value::Vector(vec![0.1, 0.2]);
        let b = Value::Vector(vec![0.1, 0.3]);
        assert_eq!(a.total_cmp(&b), Ordering::Less);
    }
}
