// SPDX-License-Identifier: PMPL-1.0-or-later
//! Modality schema registry.
//!
//! Field types are looked up here during checking. The structural fields
//! every payload exposes are seeded; deployments register their own. In
//! permissive mode unknown fields type as String; strict mode rejects them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use verisim_model::Modality;

use crate::types::VqlType;

/// Unknown-field handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    #[default]
    Permissive,
    Strict,
}

/// Registry of declared field types per modality.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    fields: HashMap<(Modality, String), VqlType>,
    mode: SchemaMode,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let mut registry = Self {
            fields: HashMap::new(),
            mode: SchemaMode::Permissive,
        };
        // Structural fields every payload exposes.
        registry.declare(Modality::Document, "title", VqlType::String);
        registry.declare(Modality::Document, "body", VqlType::String);
        registry.declare(Modality::Semantic, "types", VqlType::String);
        registry.declare(Modality::Vector, "dimension", VqlType::Int);
        registry.declare(Modality::Vector, "model", VqlType::String);
        registry.declare(Modality::Vector, "embedding", VqlType::Vector { dim: None });
        registry.declare(Modality::Tensor, "rank", VqlType::Int);
        registry.declare(Modality::Tensor, "size", VqlType::Int);
        registry.declare(Modality::Graph, "degree", VqlType::Int);
        registry.declare(Modality::Temporal, "version", VqlType::Int);
        registry.declare(Modality::Temporal, "count", VqlType::Int);
        registry
    }
}

impl SchemaRegistry {
    pub fn new(mode: SchemaMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Declare a field's type.
    pub fn declare(&mut self, modality: Modality, field: &str, ty: VqlType) {
        self.fields.insert((modality, field.to_string()), ty);
    }

    pub fn mode(&self) -> SchemaMode {
        self.mode
    }

    /// A field's explicitly declared type, with no permissive fallback.
    /// Mutation checking uses this: values for undeclared fields are only
    /// rejected in strict mode.
    pub fn declared_field_type(&self, modality: Modality, field: &str) -> Option<VqlType> {
        self.fields.get(&(modality, field.to_string())).cloned()
    }

    /// Look up a field's declared type. Permissive mode types unknown fields
    /// as String; strict mode returns None so the checker can reject.
    pub fn field_type(&self, modality: Modality, field: &str) -> Option<VqlType> {
        match self.fields.get(&(modality, field.to_string())) {
            Some(ty) => Some(ty.clone()),
            None => match self.mode {
                SchemaMode::Permissive => Some(VqlType::String),
                SchemaMode::Strict => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_fields_seeded() {
        let registry = SchemaRegistry::default();
        assert_eq!(
            registry.field_type(Modality::Document, "title"),
            Some(VqlType::String)
        );
        assert_eq!(
            registry.field_type(Modality::Vector, "dimension"),
            Some(VqlType::Int)
        );
    }

    #[test]
    fn test_permissive_unknown_is_string() {
        let registry = SchemaRegistry::default();
        assert_eq!(
            registry.field_type(Modality::Document, "severity"),
            Some(VqlType::String)
        );
    }

    #[test]
    fn test_strict_unknown_is_none() {
        let registry = SchemaRegistry::new(SchemaMode::Strict);
        assert_eq!(registry.field_type(Modality::Document, "severity"), None);
    }

    #[test]
    fn test_declared_field_wins_in_strict() {
        let mut registry = SchemaRegistry::new(SchemaMode::Strict);
        registry.declare(Modality::Document, "severity", VqlType::Int);
        assert_eq!(
            registry.field_type(Modality::Document, "severity"),
            Some(VqlType::Int)
        );
    }
}
