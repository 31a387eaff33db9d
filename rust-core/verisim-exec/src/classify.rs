// SPDX-License-Identifier: PMPL-1.0-or-later
//! WHERE-clause classification.
//!
//! Folds the condition tree into a pushdown part (delegated to stores) and
//! a cross-modal part (evaluated post-fetch). The fold preserves
//! And/Or/Not structure: conjunctions split their children between the two
//! sides, while a disjunction containing any cross-modal operand moves
//! wholly to the cross-modal side.

use verisim_store::{FieldPredicate, StorePredicate};
use verisim_vql::{Condition, Predicate};

/// The classified WHERE clause.
#[derive(Debug, Clone, Default)]
pub struct Classified {
    /// Store-evaluable predicate tree.
    pub pushdown: Option<StorePredicate>,
    /// Post-fetch condition tree.
    pub cross_modal: Option<Condition>,
}

impl Classified {
    pub fn is_fully_pushdown(&self) -> bool {
        self.cross_modal.is_none()
    }
}

/// Classify a condition tree.
pub fn classify(condition: &Condition) -> Classified {
    match condition {
        Condition::And(a, b) => {
            let left = classify(a);
            let right = classify(b);
            Classified {
                pushdown: merge_and(left.pushdown, right.pushdown),
                cross_modal: merge_and_cond(left.cross_modal, right.cross_modal),
            }
        }
        Condition::Or(a, b) => {
            let left = classify(a);
            let right = classify(b);
            if left.cross_modal.is_some() || right.cross_modal.is_some() {
                // One cross-modal operand poisons the whole disjunction.
                Classified {
                    pushdown: None,
                    cross_modal: Some(condition.clone()),
                }
            } else {
                Classified {
                    pushdown: match (left.pushdown, right.pushdown) {
                        (Some(l), Some(r)) => Some(StorePredicate::Or(Box::new(l), Box::new(r))),
                        _ => None,
                    },
                    cross_modal: None,
                }
            }
        }
        Condition::Not(inner) => {
            let classified = classify(inner);
            if classified.cross_modal.is_some() {
                Classified {
                    pushdown: None,
                    cross_modal: Some(condition.clone()),
                }
            } else {
                Classified {
                    pushdown: classified.pushdown.map(|p| StorePredicate::Not(Box::new(p))),
                    cross_modal: None,
                }
            }
        }
        Condition::Pred(pred) => match to_field_predicate(pred) {
            Some(field_pred) => Classified {
                pushdown: Some(StorePredicate::Field(field_pred)),
                cross_modal: None,
            },
            None => Classified {
                pushdown: None,
                cross_modal: Some(condition.clone()),
            },
        },
    }
}

/// Convert a modality-local predicate into the store pushdown language.
/// Cross-modal predicates (DRIFT, CONSISTENT, EXISTS, field-to-field
/// compares, aggregate compares) return `None`.
fn to_field_predicate(pred: &Predicate) -> Option<FieldPredicate> {
    match pred {
        Predicate::Compare { field, op, value, .. } => Some(FieldPredicate::Compare {
            modality: field.modality,
            field: field.field.clone(),
            op: *op,
            value: value.clone(),
        }),
        Predicate::Contains { modality, field, needle, .. } => Some(FieldPredicate::Contains {
            modality: *modality,
            field: field.clone(),
            needle: needle.clone(),
        }),
        Predicate::MatchesTerms { modality, field, terms, .. } => Some(FieldPredicate::Matches {
            modality: *modality,
            field: field.clone(),
            terms: terms.clone(),
        }),
        Predicate::SimilarTo { embedding, threshold, .. } => Some(FieldPredicate::SimilarTo {
            embedding: embedding.clone(),
            threshold: *threshold,
        }),
        Predicate::GraphPattern { subject, edge, object, .. } => Some(FieldPredicate::Edge {
            subject: subject.clone(),
            edge: edge.clone(),
            object: object.clone(),
        }),
        Predicate::CompareFields { .. }
        | Predicate::Drift { .. }
        | Predicate::Consistent { .. }
        | Predicate::CompareAggregate { .. }
        | Predicate::Exists { .. }
        | Predicate::NotExists { .. } => None,
    }
}

fn merge_and(a: Option<StorePredicate>, b: Option<StorePredicate>) -> Option<StorePredicate> {
    match (a, b) {
        (Some(l), Some(r)) => Some(StorePredicate::And(Box::new(l), Box::new(r))),
        (Some(p), None) | (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}

fn merge_and_cond(a: Option<Condition>, b: Option<Condition>) -> Option<Condition> {
    match (a, b) {
        (Some(l), Some(r)) => Some(Condition::And(Box::new(l), Box::new(r))),
        (Some(c), None) | (None, Some(c)) => Some(c),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verisim_vql::{parse, Statement};

    fn where_clause(input: &str) -> Condition {
        let Statement::Query(q) = parse(input).unwrap() else { panic!() };
        q.where_clause.unwrap()
    }

    #[test]
    fn test_simple_predicate_pushes_down() {
        let cond = where_clause("SELECT * FROM STORE s WHERE DOCUMENT.severity > 3");
        let classified = classify(&cond);
        assert!(classified.pushdown.is_some());
        assert!(classified.is_fully_pushdown());
    }

    #[test]
    fn test_drift_is_cross_modal() {
        let cond = where_clause("SELECT * FROM STORE s WHERE DRIFT(DOCUMENT, VECTOR) > 0.3");
        let classified = classify(&cond);
        assert!(classified.pushdown.is_none());
        assert!(classified.cross_modal.is_some());
    }

    #[test]
    fn test_conjunction_splits() {
        let cond = where_clause(
            "SELECT * FROM STORE s WHERE DOCUMENT.severity > 3 AND TENSOR EXISTS",
        );
        let classified = classify(&cond);
        assert!(classified.pushdown.is_some());
        assert!(classified.cross_modal.is_some());
    }

    #[test]
    fn test_disjunction_with_cross_operand_is_wholly_cross() {
        let cond = where_clause(
            "SELECT * FROM STORE s WHERE DOCUMENT.severity > 3 OR TENSOR EXISTS",
        );
        let classified = classify(&cond);
        assert!(classified.pushdown.is_none());
        assert!(matches!(classified.cross_modal, Some(Condition::Or(_, _))));
    }

    #[test]
    fn test_pure_pushdown_disjunction_stays_pushdown() {
        let cond = where_clause(
            "SELECT * FROM STORE s WHERE DOCUMENT.severity > 3 OR DOCUMENT CONTAINS \"x\"",
        );
        let classified = classify(&cond);
        assert!(matches!(classified.pushdown, Some(StorePredicate::Or(_, _))));
        assert!(classified.is_fully_pushdown());
    }

    #[test]
    fn test_not_over_cross_goes_cross() {
        let cond = where_clause("SELECT * FROM STORE s WHERE NOT (SEMANTIC EXISTS)");
        let classified = classify(&cond);
        assert!(classified.pushdown.is_none());
        assert!(matches!(classified.cross_modal, Some(Condition::Not(_))));
    }

    #[test]
    fn test_not_over_pushdown_stays_pushdown() {
        let cond = where_clause("SELECT * FROM STORE s WHERE NOT (DOCUMENT.severity > 3)");
        let classified = classify(&cond);
        assert!(matches!(classified.pushdown, Some(StorePredicate::Not(_))));
    }

    #[test]
    fn test_cross_field_compare_is_cross_modal() {
        let cond = where_clause("SELECT * FROM STORE s WHERE DOCUMENT.count = GRAPH.degree");
        let classified = classify(&cond);
        assert!(classified.cross_modal.is_some());
        assert!(classified.pushdown.is_none());
    }

    #[test]
    fn test_nested_structure_preserved() {
        let cond = where_clause(
            "SELECT * FROM STORE s WHERE (DOCUMENT.a = 1 AND VECTOR.dimension > 2) AND (TENSOR EXISTS AND DOCUMENT.b = 2)",
        );
        let classified = classify(&cond);
        // Three pushdown leaves joined by And; one cross leaf.
        let Some(pushdown) = classified.pushdown else { panic!() };
        assert!(matches!(pushdown, StorePredicate::And(_, _)));
        assert!(matches!(classified.cross_modal, Some(Condition::Pred(_))));
    }
}
