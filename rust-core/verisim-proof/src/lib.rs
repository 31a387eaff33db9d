// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Proof Layer
//!
//! Proof obligations are generated by the type checker for dependent-type
//! queries; this crate defines them, the witness material the executor
//! collects, the adapter that dispatches obligations to an external prover,
//! and the certificates returned with query results. Circuit-level ZKP
//! cryptography lives in the external prover - the adapter only canonicalises,
//! dispatches, and hashes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

mod certificate;
mod prover;
mod zkp;

pub use certificate::{CertificateBundle, ProofCertificate};
pub use prover::{ExternalProver, HashCommitmentProver, ProofVerifier, RejectingProver};
pub use zkp::{
    commit, hash, merkle_proof, merkle_root, verify_commitment, verify_merkle_proof,
    HashCommitment, MerklePathElement, MerkleProof,
};

use verisim_model::Modality;

/// Proof errors
#[derive(Error, Debug, Clone)]
pub enum ProofError {
    #[error("Obligation {contract} rejected by prover: {reason}")]
    Rejected { contract: String, reason: String },

    #[error("Witness missing field '{field}' for {kind:?} obligation")]
    WitnessIncomplete { kind: ProofKind, field: String },

    #[error("Certificate integrity check failed for {0}")]
    CertificateTampered(String),

    #[error("Prover unreachable: {0}")]
    ProverUnreachable(String),

    #[error("Incompatible proof composition: {0}")]
    IncompatibleComposition(String),
}

impl ProofError {
    pub fn code(&self) -> &'static str {
        match self {
            ProofError::Rejected { .. } => "proof/rejected",
            ProofError::WitnessIncomplete { .. } => "proof/witness-incomplete",
            ProofError::CertificateTampered(_) => "proof/certificate-tampered",
            ProofError::ProverUnreachable(_) => "proof/prover-unreachable",
            ProofError::IncompatibleComposition(_) => "proof/incompatible-composition",
        }
    }

    /// Proof failures are fatal to the query; only prover transport failures
    /// are retryable.
    pub fn recoverable(&self) -> bool {
        matches!(self, ProofError::ProverUnreachable(_))
    }

    pub fn hint(&self) -> String {
        match self {
            ProofError::Rejected { .. } => "the obligation's claim does not hold for this data".to_string(),
            ProofError::WitnessIncomplete { field, .. } => {
                format!("the executor must collect '{field}' before verification")
            }
            ProofError::CertificateTampered(_) => "re-run the query to obtain a fresh certificate".to_string(),
            ProofError::ProverUnreachable(_) => "check prover connectivity; retried with backoff".to_string(),
            ProofError::IncompatibleComposition(_) => "remove one of the conflicting PROOF clauses".to_string(),
        }
    }
}

/// Kinds of proof obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofKind {
    Existence,
    Integrity,
    Consistency,
    Provenance,
    Freshness,
    Access,
    Citation,
    Custom,
}

impl ProofKind {
    /// Witness fields the executor must collect for this kind.
    pub fn witness_fields(self) -> &'static [&'static str] {
        match self {
            ProofKind::Existence => &["hexad_id", "modality_presence"],
            ProofKind::Integrity => &["content_hashes", "merkle_root"],
            ProofKind::Consistency => &["embedding_a", "embedding_b", "drift_threshold"],
            ProofKind::Provenance => &["source_chain"],
            ProofKind::Freshness => &["last_modified", "max_age_secs"],
            ProofKind::Access => &["principal", "capability"],
            ProofKind::Citation => &["citations"],
            ProofKind::Custom => &["opaque"],
        }
    }

    /// Modalities the executor must fetch to build the witness.
    pub fn required_modalities(self) -> Vec<Modality> {
        match self {
            ProofKind::Consistency => vec![Modality::Document, Modality::Vector],
            ProofKind::Provenance | ProofKind::Citation => vec![Modality::Semantic],
            ProofKind::Freshness => vec![Modality::Temporal],
            _ => Vec::new(),
        }
    }

    /// Rough verification cost used by the planner to order obligations.
    pub fn estimated_time_ms(self) -> u64 {
        match self {
            ProofKind::Existence => 5,
            ProofKind::Access => 5,
            ProofKind::Freshness => 10,
            ProofKind::Citation => 20,
            ProofKind::Integrity => 50,
            ProofKind::Consistency => 50,
            ProofKind::Provenance => 80,
            ProofKind::Custom => 100,
        }
    }
}

impl std::str::FromStr for ProofKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EXISTENCE" => Ok(ProofKind::Existence),
            "INTEGRITY" => Ok(ProofKind::Integrity),
            "CONSISTENCY" => Ok(ProofKind::Consistency),
            "PROVENANCE" => Ok(ProofKind::Provenance),
            "FRESHNESS" => Ok(ProofKind::Freshness),
            "ACCESS" => Ok(ProofKind::Access),
            "CITATION" => Ok(ProofKind::Citation),
            "CUSTOM" => Ok(ProofKind::Custom),
            other => Err(format!("unknown proof kind: {other}")),
        }
    }
}

/// A structured description of a proof to be discharged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofObligation {
    pub kind: ProofKind,
    /// Contract name from the VQL surface, e.g. `INTEGRITY(tamper-free)`.
    pub contract: String,
    pub witness_fields: Vec<String>,
    /// Circuit identifier for the external prover. For Custom obligations
    /// this is the contract name, passed through opaquely.
    pub circuit_id: String,
    pub required_modalities: Vec<Modality>,
    pub estimated_time_ms: u64,
}

impl ProofObligation {
    pub fn new(kind: ProofKind, contract: impl Into<String>) -> Self {
        let contract = contract.into();
        let circuit_id = match kind {
            ProofKind::Custom => contract.clone(),
            _ => format!("circuit:{}", contract),
        };
        Self {
            kind,
            witness_fields: kind.witness_fields().iter().map(|s| s.to_string()).collect(),
            circuit_id,
            required_modalities: kind.required_modalities(),
            estimated_time_ms: kind.estimated_time_ms(),
            contract,
        }
    }
}

/// Runtime witness material, keyed by witness field name. BTreeMap keeps the
/// canonical serialisation deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProofWitness(pub BTreeMap<String, serde_json::Value>);

impl ProofWitness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    /// Ensure every declared witness field is present.
    pub fn check_complete(&self, obligation: &ProofObligation) -> Result<(), ProofError> {
        for field in &obligation.witness_fields {
            if !self.0.contains_key(field) {
                return Err(ProofError::WitnessIncomplete {
                    kind: obligation.kind,
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }
}

/// How a composed proof plan executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategy {
    /// No obligation depends on another; verify in parallel.
    Independent,
    /// Ordering constraints exist (Citation before Provenance).
    Sequential,
}

/// A composed proof plan for one query.
///
/// Each group is an alternative chain from the VQL surface: specs joined by
/// `OR` land in one group and the first obligation that verifies yields the
/// group's certificate; specs joined by `AND` are separate groups, all
/// required. Groups are kept in verification order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationPlan {
    pub strategy: PlanStrategy,
    pub groups: Vec<Vec<ProofObligation>>,
}

impl ObligationPlan {
    /// Compose obligation groups into a plan.
    ///
    /// Citation combined with Provenance forces Sequential with the Citation
    /// group first. Everything else runs Independent.
    pub fn compose(mut groups: Vec<Vec<ProofObligation>>) -> Self {
        let group_kind = |g: &Vec<ProofObligation>| g.first().map(|o| o.kind);
        let has_citation = groups.iter().any(|g| group_kind(g) == Some(ProofKind::Citation));
        let has_provenance = groups.iter().any(|g| group_kind(g) == Some(ProofKind::Provenance));

        if has_citation && has_provenance {
            groups.sort_by_key(|g| match group_kind(g) {
                Some(ProofKind::Citation) => 0,
                Some(ProofKind::Provenance) => 2,
                _ => 1,
            });
            Self {
                strategy: PlanStrategy::Sequential,
                groups,
            }
        } else {
            Self {
                strategy: PlanStrategy::Independent,
                groups,
            }
        }
    }

    /// Every obligation across all groups, in plan order.
    pub fn obligations(&self) -> impl Iterator<Item = &ProofObligation> {
        self.groups.iter().flatten()
    }

    /// Number of required groups (one certificate each).
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
