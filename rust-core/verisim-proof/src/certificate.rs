// SPDX-License-Identifier: PMPL-1.0-or-later
//! Proof certificates.
//!
//! A certificate records that an obligation was satisfied at a timestamp.
//! Its integrity hash is a SHA-256 over the canonicalised (obligation,
//! witness, timestamp) triple - no query content or PII enters the
//! certificate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ProofError, ProofKind, ProofObligation, ProofWitness};

/// The integrity-hashed record that an obligation was satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofCertificate {
    pub kind: ProofKind,
    pub obligation: ProofObligation,
    pub witness: ProofWitness,
    pub timestamp: DateTime<Utc>,
    /// Hex-encoded SHA-256 over canonicalised (obligation, witness, timestamp).
    pub integrity_hash: String,
}

impl ProofCertificate {
    /// Issue a certificate for a discharged obligation.
    pub fn issue(obligation: ProofObligation, witness: ProofWitness) -> Self {
        let timestamp = Utc::now();
        let integrity_hash = integrity_hash(&obligation, &witness, timestamp);
        Self {
            kind: obligation.kind,
            obligation,
            witness,
            timestamp,
            integrity_hash,
        }
    }

    /// Verify the certificate's integrity hash. Any mutated field causes a
    /// mismatch.
    pub fn verify(&self) -> Result<(), ProofError> {
        if self.kind != self.obligation.kind {
            return Err(ProofError::CertificateTampered(self.obligation.contract.clone()));
        }
        let expected = integrity_hash(&self.obligation, &self.witness, self.timestamp);
        if expected == self.integrity_hash {
            Ok(())
        } else {
            Err(ProofError::CertificateTampered(self.obligation.contract.clone()))
        }
    }
}

/// Canonical digest over (obligation, witness, timestamp).
///
/// Serialisation is deterministic: obligations serialise field-by-field in
/// declaration order and witnesses are BTreeMaps, so equal content always
/// digests equally.
fn integrity_hash(
    obligation: &ProofObligation,
    witness: &ProofWitness,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(obligation).unwrap_or_default());
    hasher.update(serde_json::to_vec(witness).unwrap_or_default());
    hasher.update(timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// An ordered bundle of certificates for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub certificates: Vec<ProofCertificate>,
}

impl CertificateBundle {
    pub fn new(certificates: Vec<ProofCertificate>) -> Self {
        Self { certificates }
    }

    /// Verify every certificate in the bundle.
    pub fn verify_all(&self) -> Result<(), ProofError> {
        for cert in &self.certificates {
            cert.verify()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Sequential-plan ordering invariant: every Citation certificate's
    /// timestamp precedes every Provenance certificate's.
    pub fn citation_precedes_provenance(&self) -> bool {
        let citations: Vec<_> = self
            .certificates
            .iter()
            .filter(|c| c.kind == ProofKind::Citation)
            .collect();
        let provenances: Vec<_> = self
            .certificates
            .iter()
            .filter(|c| c.kind == ProofKind::Provenance)
            .collect();
        citations
            .iter()
            .all(|c| provenances.iter().all(|p| c.timestamp <= p.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ProofCertificate {
        let ob = ProofObligation::new(ProofKind::Existence, "presence");
        let witness = ProofWitness::new()
            .with("hexad_id", json!("ent-1"))
            .with("modality_presence", json!(["document", "vector"]));
        ProofCertificate::issue(ob, witness)
    }

    #[test]
    fn test_issue_then_verify() {
        let cert = sample();
        assert!(cert.verify().is_ok());
    }

    #[test]
    fn test_mutating_witness_fails_verification() {
        let mut cert = sample();
        cert.witness = cert.witness.clone().with("hexad_id", json!("other"));
        assert!(matches!(cert.verify(), Err(ProofError::CertificateTampered(_))));
    }

    #[test]
    fn test_mutating_timestamp_fails_verification() {
        let mut cert = sample();
        cert.timestamp = cert.timestamp + chrono::Duration::seconds(1);
        assert!(cert.verify().is_err());
    }

    #[test]
    fn test_mutating_kind_fails_verification() {
        let mut cert = sample();
        cert.kind = ProofKind::Integrity;
        assert!(cert.verify().is_err());
    }

    #[test]
    fn test_bundle_ordering_invariant() {
        let citation = ProofCertificate::issue(
            ProofObligation::new(ProofKind::Citation, "cited"),
            ProofWitness::new().with("citations", json!([])),
        );
        let provenance = ProofCertificate::issue(
            ProofObligation::new(ProofKind::Provenance, "chain"),
            ProofWitness::new().with("source_chain", json!([])),
        );
        let good = CertificateBundle::new(vec![citation.clone(), provenance.clone()]);
        assert!(good.citation_precedes_provenance());
        assert!(good.verify_all().is_ok());
    }
}
