// SPDX-License-Identifier: PMPL-1.0-or-later
//! Authoritative-modality policy.
//!
//! For each field class at most one modality is authoritative; the other
//! modalities carry derivations. The normalizer consults this policy to
//! decide repair direction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Modality;

/// Maps field classes (title, date, embedding, ...) to the single modality
/// that owns them. Map semantics guarantee the at-most-one invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldClassPolicy {
    authorities: BTreeMap<String, Modality>,
}

impl Default for FieldClassPolicy {
    fn default() -> Self {
        let mut authorities = BTreeMap::new();
        authorities.insert("title".to_string(), Modality::Document);
        authorities.insert("body".to_string(), Modality::Document);
        authorities.insert("embedding".to_string(), Modality::Vector);
        authorities.insert("types".to_string(), Modality::Semantic);
        authorities.insert("claims".to_string(), Modality::Semantic);
        authorities.insert("relationships".to_string(), Modality::Graph);
        authorities.insert("tensor".to_string(), Modality::Tensor);
        authorities.insert("history".to_string(), Modality::Temporal);
        Self { authorities }
    }
}

impl FieldClassPolicy {
    pub fn new(authorities: BTreeMap<String, Modality>) -> Self {
        Self { authorities }
    }

    /// The authoritative modality for a field class, if any is designated.
    pub fn authoritative(&self, field_class: &str) -> Option<Modality> {
        self.authorities.get(field_class).copied()
    }

    /// True when `modality` holds a derivation (not the authority) of the class.
    pub fn is_derivation(&self, field_class: &str, modality: Modality) -> bool {
        self.authoritative(field_class)
            .map(|a| a != modality)
            .unwrap_or(false)
    }

    /// The default repair authority between a modality pair: the one that is
    /// authoritative for more field classes wins; ties favour Document.
    pub fn repair_authority(&self, a: Modality, b: Modality) -> Modality {
        let count = |m: Modality| self.authorities.values().filter(|v| **v == m).count();
        let (ca, cb) = (count(a), count(b));
        if ca > cb {
            a
        } else if cb > ca {
            b
        } else if b == Modality::Document {
            b
        } else {
            a
        }
    }
}
