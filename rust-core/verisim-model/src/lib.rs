// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Data Model
//!
//! One entity, six synchronized representations.
//! The Hexad is the fundamental unit of VeriSimDB - each entity exists
//! simultaneously across the configured modalities, joined only by its id.
//! This crate holds the model types shared by every other core crate:
//! modality enumeration, payloads, values, the hexad itself, and the
//! registry mapping hexads to owning stores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod authority;
mod hexad;
mod output;
mod payload;
mod registry;
mod value;

pub use authority::FieldClassPolicy;
pub use hexad::{Hexad, HexadBuilder, ModalityRecord};
pub use output::{exit_code, Notice, NoticeKind, Verbosity};
pub use payload::{GraphTriple, ModalityPayload, VersionStamp};
pub use registry::{HexadRegistry, ModalityLocation};
pub use value::{CmpOp, Value};

/// Model errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid hexad id: {0}")]
    InvalidId(String),

    #[error("Unknown modality: {0}")]
    UnknownModality(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Modality {modality} absent on hexad {id}")]
    ModalityAbsent { id: String, modality: Modality },

    #[error("Version regression on {modality}: {current} -> {proposed}")]
    VersionRegression {
        modality: Modality,
        current: u64,
        proposed: u64,
    },

    #[error("Hexad {0} is tombstoned")]
    Tombstoned(String),
}

impl ModelError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ModelError::InvalidId(_) => "runtime/invalid-id",
            ModelError::UnknownModality(_) => "type/unknown-modality",
            ModelError::NotFound(_) => "runtime/not-found",
            ModelError::ModalityAbsent { .. } => "runtime/modality-absent",
            ModelError::VersionRegression { .. } => "internal/version-regression",
            ModelError::Tombstoned(_) => "runtime/tombstoned",
        }
    }

    /// Whether a retry can plausibly succeed.
    pub fn recoverable(&self) -> bool {
        matches!(self, ModelError::NotFound(_))
    }

    /// One-line hint for user-facing output.
    pub fn hint(&self) -> String {
        match self {
            ModelError::InvalidId(_) => "hexad ids are URL-safe ASCII strings".to_string(),
            ModelError::UnknownModality(m) => {
                format!("known modalities: {} (got '{m}')", Modality::names().join(", "))
            }
            ModelError::NotFound(_) => "check the id, or the hexad may be tombstoned".to_string(),
            ModelError::ModalityAbsent { modality, .. } => {
                format!("insert a {modality} payload before addressing its fields")
            }
            ModelError::VersionRegression { .. } => {
                "per-modality versions only move forward".to_string()
            }
            ModelError::Tombstoned(_) => "deleted hexads stay readable only via the temporal log".to_string(),
        }
    }
}

/// The modalities of VeriSimDB.
///
/// The count is a build-time constant (`Modality::ALL`); every interface is
/// written against the enum so the set can grow without touching call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Graph,
    Vector,
    Tensor,
    Semantic,
    Document,
    Temporal,
}

impl Modality {
    /// All modalities in canonical order.
    pub const ALL: [Modality; 6] = [
        Modality::Graph,
        Modality::Vector,
        Modality::Tensor,
        Modality::Semantic,
        Modality::Document,
        Modality::Temporal,
    ];

    /// Canonical lowercase names, aligned with `ALL`.
    pub fn names() -> Vec<&'static str> {
        Modality::ALL.iter().map(|m| m.as_str()).collect()
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Graph => "graph",
            Modality::Vector => "vector",
            Modality::Tensor => "tensor",
            Modality::Semantic => "semantic",
            Modality::Document => "document",
            Modality::Temporal => "temporal",
        }
    }

    /// Execution priority - lower value means execute earlier.
    ///
    /// Temporal first (often cached), selective indexes next, semantic last
    /// (proof-bearing and therefore expensive).
    pub fn execution_priority(self) -> u32 {
        match self {
            Modality::Temporal => 10,
            Modality::Vector => 20,
            Modality::Document => 30,
            Modality::Graph => 40,
            Modality::Tensor => 50,
            Modality::Semantic => 90,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graph" => Ok(Modality::Graph),
            "vector" => Ok(Modality::Vector),
            "tensor" => Ok(Modality::Tensor),
            "semantic" => Ok(Modality::Semantic),
            "document" => Ok(Modality::Document),
            "temporal" => Ok(Modality::Temporal),
            _ => Err(ModelError::UnknownModality(s.to_string())),
        }
    }
}

/// Unique identifier for a Hexad entity.
///
/// Immutable once assigned; the only value used to join across modalities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexadId(pub String);

impl HexadId {
    /// Create a new Hexad ID. Fails on empty or non-URL-safe input.
    pub fn parse(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ModelError::InvalidId("(empty)".to_string()));
        }
        if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))
        {
            return Err(ModelError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Create without validation (trusted internal callers).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new UUID-based ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HexadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HexadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HexadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_display_roundtrip() {
        for m in Modality::ALL {
            let s = m.to_string();
            let parsed: Modality = s.parse().unwrap();
            assert_eq!(m, parsed);
        }
    }

    #[test]
    fn test_modality_case_insensitive_parse() {
        assert_eq!("GRAPH".parse::<Modality>().unwrap(), Modality::Graph);
        assert_eq!("Document".parse::<Modality>().unwrap(), Modality::Document);
    }

    #[test]
    fn test_unknown_modality_error() {
        let err = "provenance".parse::<Modality>().unwrap_err();
        assert_eq!(err.code(), "type/unknown-modality");
    }

    #[test]
    fn test_hexad_id_validation() {
        assert!(HexadId::parse("ent-1").is_ok());
        assert!(HexadId::parse("a.b_c~d").is_ok());
        assert!(HexadId::parse("").is_err());
        assert!(HexadId::parse("has space").is_err());
        assert!(HexadId::parse("ünïcode").is_err());
    }

    #[test]
    fn test_generated_ids_are_url_safe() {
        for _ in 0..10 {
            let id = HexadId::generate();
            assert!(HexadId::parse(id.as_str()).is_ok());
        }
    }

    #[test]
    fn test_execution_priority_ordering() {
        assert!(Modality::Temporal.execution_priority() < Modality::Vector.execution_priority());
        assert!(Modality::Tensor.execution_priority() < Modality::Semantic.execution_priority());
    }
}
