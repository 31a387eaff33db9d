// SPDX-License-Identifier: PMPL-1.0-or-later
//! Pushdown predicates.
//!
//! The executor folds a query's WHERE clause and hands each store the part
//! it can evaluate locally. Predicates are serializable so federated peers
//! receive the same representation.

use serde::{Deserialize, Serialize};

use verisim_model::{CmpOp, Modality, ModalityPayload, Value};

/// A modality-local leaf predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPredicate {
    /// `MOD.field op literal`
    Compare {
        modality: Modality,
        field: String,
        op: CmpOp,
        value: Value,
    },
    /// Full-text `CONTAINS` over a document field (title+body when field is None).
    Contains {
        modality: Modality,
        field: Option<String>,
        needle: String,
    },
    /// Full-text `MATCHES` - whitespace-separated terms, all required.
    Matches {
        modality: Modality,
        field: Option<String>,
        terms: Vec<String>,
    },
    /// `VECTOR SIMILAR TO [..] WITHIN t` - cosine distance at most `threshold`.
    SimilarTo {
        embedding: Vec<f32>,
        threshold: f64,
    },
    /// Graph pattern `subj edge obj`; empty subject means the owning hexad.
    Edge {
        subject: Option<String>,
        edge: String,
        object: String,
    },
}

impl FieldPredicate {
    /// The modality this predicate addresses.
    pub fn modality(&self) -> Modality {
        match self {
            FieldPredicate::Compare { modality, .. }
            | FieldPredicate::Contains { modality, .. }
            | FieldPredicate::Matches { modality, .. } => *modality,
            FieldPredicate::SimilarTo { .. } => Modality::Vector,
            FieldPredicate::Edge { .. } => Modality::Graph,
        }
    }

    /// Evaluate against one hexad's payload for the addressed modality.
    /// An absent payload never matches.
    pub fn matches_payload(&self, payload: Option<&ModalityPayload>) -> bool {
        let Some(payload) = payload else {
            return false;
        };
        match self {
            FieldPredicate::Compare { field, op, value, .. } => {
                op.eval(&payload.field(field), value)
            }
            FieldPredicate::Contains { field, needle, .. } => {
                haystack(payload, field.as_deref())
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            }
            FieldPredicate::Matches { field, terms, .. } => {
                let hay = haystack(payload, field.as_deref()).to_lowercase();
                terms.iter().all(|t| hay.contains(&t.to_lowercase()))
            }
            FieldPredicate::SimilarTo { embedding, threshold } => match payload {
                ModalityPayload::Vector { embedding: stored, .. } => {
                    cosine_distance(stored, embedding) <= *threshold
                }
                _ => false,
            },
            FieldPredicate::Edge { subject, edge, object } => match payload {
                ModalityPayload::Graph { triples } => triples.iter().any(|t| {
                    subject.as_deref().map(|s| t.subject == s).unwrap_or(true)
                        && t.edge == *edge
                        && t.object == *object
                }),
                _ => false,
            },
        }
    }
}

/// A pushdown condition tree. And/Or/Not structure from the WHERE clause is
/// preserved so stores can short-circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePredicate {
    /// Matches every hexad.
    True,
    And(Box<StorePredicate>, Box<StorePredicate>),
    Or(Box<StorePredicate>, Box<StorePredicate>),
    Not(Box<StorePredicate>),
    Field(FieldPredicate),
}

impl StorePredicate {
    /// Evaluate against a lookup of payloads by modality.
    pub fn matches<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(Modality) -> Option<&'a ModalityPayload>,
    {
        match self {
            StorePredicate::True => true,
            StorePredicate::And(a, b) => a.matches(lookup) && b.matches(lookup),
            StorePredicate::Or(a, b) => a.matches(lookup) || b.matches(lookup),
            StorePredicate::Not(inner) => !inner.matches(lookup),
            StorePredicate::Field(p) => p.matches_payload(lookup(p.modality())),
        }
    }

    /// Modalities referenced anywhere in the tree.
    pub fn modalities(&self) -> Vec<Modality> {
        let mut out = Vec::new();
        self.collect_modalities(&mut out);
        out.dedup();
        out
    }

    fn collect_modalities(&self, out: &mut Vec<Modality>) {
        match self {
            StorePredicate::True => {}
            StorePredicate::And(a, b) | StorePredicate::Or(a, b) => {
                a.collect_modalities(out);
                b.collect_modalities(out);
            }
            StorePredicate::Not(inner) => inner.collect_modalities(out),
            StorePredicate::Field(p) => {
                let m = p.modality();
                if !out.contains(&m) {
                    out.push(m);
                }
            }
        }
    }
}

/// Text haystack for CONTAINS/MATCHES.
fn haystack(payload: &ModalityPayload, field: Option<&str>) -> String {
    match (payload, field) {
        (ModalityPayload::Document { title, body, .. }, None) => format!("{title}\n{body}"),
        (payload, Some(f)) => payload.field(f).to_string(),
        (payload, None) => payload
            .fields()
            .values()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Cosine distance in [0, 2]; 1.0 when either vector is degenerate.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        1.0 - dot / (norm_a * norm_b)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(title: &str, severity: i64) -> ModalityPayload {
        ModalityPayload::Document {
            title: title.to_string(),
            body: "the quick brown fox".to_string(),
            fields: BTreeMap::from([("severity".to_string(), Value::Int(severity))]),
        }
    }

    #[test]
    fn test_compare_predicate() {
        let payload = doc("X", 5);
        let pred = FieldPredicate::Compare {
            modality: Modality::Document,
            field: "severity".to_string(),
            op: CmpOp::Gt,
            value: Value::Int(3),
        };
        assert!(pred.matches_payload(Some(&payload)));
        assert!(!pred.matches_payload(None));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let payload = doc("X", 5);
        let pred = FieldPredicate::Contains {
            modality: Modality::Document,
            field: None,
            needle: "QUICK".to_string(),
        };
        assert!(pred.matches_payload(Some(&payload)));
    }

    #[test]
    fn test_matches_requires_all_terms() {
        let payload = doc("X", 5);
        let hit = FieldPredicate::Matches {
            modality: Modality::Document,
            field: None,
            terms: vec!["quick".to_string(), "fox".to_string()],
        };
        let miss = FieldPredicate::Matches {
            modality: Modality::Document,
            field: None,
            terms: vec!["quick".to_string(), "wolf".to_string()],
        };
        assert!(hit.matches_payload(Some(&payload)));
        assert!(!miss.matches_payload(Some(&payload)));
    }

    #[test]
    fn test_similar_to() {
        let payload = ModalityPayload::Vector {
            embedding: vec![1.0, 0.0],
            model: None,
        };
        let close = FieldPredicate::SimilarTo {
            embedding: vec![1.0, 0.0],
            threshold: 0.1,
        };
        let far = FieldPredicate::SimilarTo {
            embedding: vec![0.0, 1.0],
            threshold: 0.1,
        };
        assert!(close.matches_payload(Some(&payload)));
        assert!(!far.matches_payload(Some(&payload)));
    }

    #[test]
    fn test_tree_structure() {
        let payload = doc("X", 5);
        let lookup = |m: Modality| {
            if m == Modality::Document {
                Some(&payload)
            } else {
                None
            }
        };
        let tree = StorePredicate::And(
            Box::new(StorePredicate::Field(FieldPredicate::Compare {
                modality: Modality::Document,
                field: "severity".to_string(),
                op: CmpOp::Gt,
                value: Value::Int(3),
            })),
            Box::new(StorePredicate::Not(Box::new(StorePredicate::Field(
                FieldPredicate::Contains {
                    modality: Modality::Document,
                    field: None,
                    needle: "wolf".to_string(),
                },
            )))),
        );
        assert!(tree.matches(&lookup));
        assert_eq!(tree.modalities(), vec![Modality::Document]);
    }
}
