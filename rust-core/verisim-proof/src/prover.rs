// SPDX-License-Identifier: PMPL-1.0-or-later
//! Prover adapter.
//!
//! The core never interprets proof payloads beyond witness completeness and
//! certificate hashing; cryptographic verification is delegated through the
//! single [`ExternalProver`] interface. The in-process
//! [`HashCommitmentProver`] discharges the structural kinds locally and is
//! what tests and standalone deployments use.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    merkle_root, ProofCertificate, ProofError, ProofKind, ProofObligation, ProofWitness,
};

/// The external prover interface: verify an obligation against its witness.
#[async_trait]
pub trait ExternalProver: Send + Sync {
    async fn verify(
        &self,
        obligation: &ProofObligation,
        witness: &ProofWitness,
    ) -> Result<(), ProofError>;
}

/// Reference prover backed by the hash/merkle primitives.
///
/// Verifies what can be checked without a circuit: witness structure,
/// Integrity merkle roots, Freshness age bounds. Custom obligations are
/// accepted opaquely - a real deployment points the adapter at a circuit
/// prover instead.
#[derive(Debug, Default, Clone)]
pub struct HashCommitmentProver;

#[async_trait]
impl ExternalProver for HashCommitmentProver {
    async fn verify(
        &self,
        obligation: &ProofObligation,
        witness: &ProofWitness,
    ) -> Result<(), ProofError> {
        match obligation.kind {
            ProofKind::Integrity => {
                let hashes = witness
                    .get("content_hashes")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| ProofError::WitnessIncomplete {
                        kind: obligation.kind,
                        field: "content_hashes".to_string(),
                    })?;
                let leaves: Vec<Vec<u8>> = hashes
                    .iter()
                    .filter_map(|h| h.as_str())
                    .map(|h| h.as_bytes().to_vec())
                    .collect();
                let expected: String = merkle_root(&leaves)
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect();
                let claimed = witness
                    .get("merkle_root")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if expected == claimed {
                    Ok(())
                } else {
                    Err(ProofError::Rejected {
                        contract: obligation.contract.clone(),
                        reason: "merkle root mismatch".to_string(),
                    })
                }
            }
            ProofKind::Existence => {
                let present = witness
                    .get("modality_presence")
                    .and_then(|v| v.as_array())
                    .map(|a| !a.is_empty())
                    .unwrap_or(false);
                if present {
                    Ok(())
                } else {
                    Err(ProofError::Rejected {
                        contract: obligation.contract.clone(),
                        reason: "no modality present".to_string(),
                    })
                }
            }
            ProofKind::Freshness => {
                let age_ok = match (
                    witness.get("last_modified").and_then(|v| v.as_str()),
                    witness.get("max_age_secs").and_then(|v| v.as_i64()),
                ) {
                    (Some(ts), Some(max_age)) => chrono::DateTime::parse_from_rfc3339(ts)
                        .map(|t| {
                            (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_seconds()
                                <= max_age
                        })
                        .unwrap_or(false),
                    _ => false,
                };
                if age_ok {
                    Ok(())
                } else {
                    Err(ProofError::Rejected {
                        contract: obligation.contract.clone(),
                        reason: "data older than the freshness bound".to_string(),
                    })
                }
            }
            ProofKind::Consistency => {
                let threshold = witness
                    .get("drift_threshold")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(f64::NAN);
                if (0.0..=1.0).contains(&threshold) {
                    Ok(())
                } else {
                    Err(ProofError::Rejected {
                        contract: obligation.contract.clone(),
                        reason: format!("drift threshold {threshold} outside [0, 1]"),
                    })
                }
            }
            // Structural acceptance: completeness was already checked and
            // these kinds need a circuit to say more.
            ProofKind::Provenance
            | ProofKind::Access
            | ProofKind::Citation
            | ProofKind::Custom => Ok(()),
        }
    }
}

/// Prover that rejects everything - exercises failure paths in tests.
#[derive(Debug, Default, Clone)]
pub struct RejectingProver;

#[async_trait]
impl ExternalProver for RejectingProver {
    async fn verify(
        &self,
        obligation: &ProofObligation,
        _witness: &ProofWitness,
    ) -> Result<(), ProofError> {
        Err(ProofError::Rejected {
            contract: obligation.contract.clone(),
            reason: "rejecting prover".to_string(),
        })
    }
}

/// The verifier adapter: obligation + runtime witness in, certificate out.
pub struct ProofVerifier {
    prover: Arc<dyn ExternalProver>,
}

impl ProofVerifier {
    pub fn new(prover: Arc<dyn ExternalProver>) -> Self {
        Self { prover }
    }

    pub fn with_reference_prover() -> Self {
        Self::new(Arc::new(HashCommitmentProver))
    }

    /// Discharge one obligation: completeness check, prover dispatch,
    /// certificate issue.
    #[instrument(skip(self, witness), fields(contract = %obligation.contract))]
    pub async fn discharge(
        &self,
        obligation: ProofObligation,
        witness: ProofWitness,
    ) -> Result<ProofCertificate, ProofError> {
        witness.check_complete(&obligation)?;
        self.prover.verify(&obligation, &witness).await?;
        debug!(kind = ?obligation.kind, "obligation discharged");
        Ok(ProofCertificate::issue(obligation, witness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_existence_discharge() {
        let verifier = ProofVerifier::with_reference_prover();
        let ob = ProofObligation::new(ProofKind::Existence, "presence");
        let witness = ProofWitness::new()
            .with("hexad_id", json!("ent-1"))
            .with("modality_presence", json!(["semantic"]));
        let cert = verifier.discharge(ob, witness).await.unwrap();
        assert!(cert.verify().is_ok());
    }

    #[tokio::test]
    async fn test_integrity_checks_merkle_root() {
        let verifier = ProofVerifier::with_reference_prover();
        let ob = ProofObligation::new(ProofKind::Integrity, "tamper-free");

        let hashes = vec!["aa".to_string(), "bb".to_string()];
        let leaves: Vec<Vec<u8>> = hashes.iter().map(|h| h.as_bytes().to_vec()).collect();
        let root: String = merkle_root(&leaves).iter().map(|b| format!("{b:02x}")).collect();

        let good = ProofWitness::new()
            .with("content_hashes", json!(hashes))
            .with("merkle_root", json!(root));
        assert!(verifier.discharge(ob.clone(), good).await.is_ok());

        let bad = ProofWitness::new()
            .with("content_hashes", json!(["aa", "bb"]))
            .with("merkle_root", json!("deadbeef"));
        let err = verifier.discharge(ob, bad).await.unwrap_err();
        assert!(matches!(err, ProofError::Rejected { .. }));
        assert!(!err.recoverable());
    }

    #[tokio::test]
    async fn test_incomplete_witness_rejected_before_prover() {
        let verifier = ProofVerifier::new(Arc::new(RejectingProver));
        let ob = ProofObligation::new(ProofKind::Citation, "cited");
        let err = verifier.discharge(ob, ProofWitness::new()).await.unwrap_err();
        // Completeness failure, not the prover's rejection.
        assert!(matches!(err, ProofError::WitnessIncomplete { .. }));
    }

    #[tokio::test]
    async fn test_rejecting_prover_is_fatal() {
        let verifier = ProofVerifier::new(Arc::new(RejectingProver));
        let ob = ProofObligation::new(ProofKind::Custom, "opaque-circuit");
        let witness = ProofWitness::new().with("opaque", json!({}));
        let err = verifier.discharge(ob, witness).await.unwrap_err();
        assert_eq!(err.code(), "proof/rejected");
    }
}
