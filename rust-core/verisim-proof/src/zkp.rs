// SPDX-License-Identifier: PMPL-1.0-or-later
//! Cryptographic primitives backing the reference prover.
//!
//! - **Hash Commitments**: commit to a value, reveal later to prove knowledge.
//! - **Merkle Proofs**: prove set membership without revealing other members.
//!
//! Circuit-level proving stays in the external prover; these primitives are
//! what the in-process reference prover and the Integrity witness use.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A hash commitment: SHA-256(claim || secret).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashCommitment {
    pub commitment: [u8; 32],
}

/// Create a hash commitment for a claim using a secret.
pub fn commit(claim: &[u8], secret: &[u8]) -> HashCommitment {
    let mut hasher = Sha256::new();
    hasher.update(claim);
    hasher.update(secret);
    HashCommitment {
        commitment: hasher.finalize().into(),
    }
}

/// Verify a hash commitment by checking SHA-256(claim || secret) == commitment.
pub fn verify_commitment(commitment: &HashCommitment, claim: &[u8], secret: &[u8]) -> bool {
    let expected = commit(claim, secret);
    constant_time_eq(&commitment.commitment, &expected.commitment)
}

/// An element in a Merkle proof path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerklePathElement {
    /// Sibling hash at this level.
    pub hash: [u8; 32],
    /// Whether the sibling is on the left (true) or right (false).
    pub is_left: bool,
}

/// A complete Merkle inclusion proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: Vec<u8>,
    pub path: Vec<MerklePathElement>,
    pub root: [u8; 32],
}

/// Compute SHA-256 hash of data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash two children to form a parent node.
fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Build a Merkle tree from leaf data and return the root hash.
/// Leaves are hashed before building the tree; odd levels duplicate the
/// final node.
pub fn merkle_root(leaves: &[Vec<u8>]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut current_level: Vec<[u8; 32]> = leaves.iter().map(|l| hash(l)).collect();
    while current_level.len() > 1 {
        if current_level.len() % 2 != 0 {
            let last = *current_level.last().unwrap();
            current_level.push(last);
        }
        let mut next_level = Vec::with_capacity(current_level.len() / 2);
        for chunk in current_level.chunks(2) {
            next_level.push(hash_pair(&chunk[0], &chunk[1]));
        }
        current_level = next_level;
    }
    current_level[0]
}

/// Generate a Merkle inclusion proof for the leaf at `index`.
pub fn merkle_proof(leaves: &[Vec<u8>], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() || leaves.is_empty() {
        return None;
    }
    let root = merkle_root(leaves);
    let mut hashed: Vec<[u8; 32]> = leaves.iter().map(|l| hash(l)).collect();
    let mut path = Vec::new();
    let mut idx = index;

    while hashed.len() > 1 {
        if hashed.len() % 2 != 0 {
            let last = *hashed.last().unwrap();
            hashed.push(last);
        }
        let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
        let is_left = idx % 2 != 0;
        path.push(MerklePathElement {
            hash: hashed[sibling_idx],
            is_left,
        });
        let mut next_level = Vec::with_capacity(hashed.len() / 2);
        for chunk in hashed.chunks(2) {
            next_level.push(hash_pair(&chunk[0], &chunk[1]));
        }
        hashed = next_level;
        idx /= 2;
    }

    Some(MerkleProof {
        leaf: leaves[index].clone(),
        path,
        root,
    })
}

/// Verify a Merkle inclusion proof.
pub fn verify_merkle_proof(proof: &MerkleProof) -> bool {
    let mut current = hash(&proof.leaf);
    for element in &proof.path {
        current = if element.is_left {
            hash_pair(&element.hash, &current)
        } else {
            hash_pair(&current, &element.hash)
        };
    }
    constant_time_eq(&current, &proof.root)
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_roundtrip() {
        let c = commit(b"claim", b"secret");
        assert!(verify_commitment(&c, b"claim", b"secret"));
        assert!(!verify_commitment(&c, b"claim", b"wrong"));
        assert!(!verify_commitment(&c, b"other", b"secret"));
    }

    #[test]
    fn test_merkle_root_deterministic() {
        let leaves = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
        assert_ne!(merkle_root(&leaves), merkle_root(&leaves[..2].to_vec()));
    }

    #[test]
    fn test_merkle_proof_roundtrip() {
        let leaves = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()];
        for i in 0..leaves.len() {
            let proof = merkle_proof(&leaves, i).unwrap();
            assert!(verify_merkle_proof(&proof), "leaf {i} failed");
        }
    }

    #[test]
    fn test_merkle_proof_tamper_detected() {
        let leaves = vec![b"a".to_vec(), b"b".to_vec()];
        let mut proof = merkle_proof(&leaves, 0).unwrap();
        proof.leaf = b"x".to_vec();
        assert!(!verify_merkle_proof(&proof));
    }

    #[test]
    fn test_merkle_proof_out_of_range() {
        let leaves = vec![b"a".to_vec()];
        assert!(merkle_proof(&leaves, 1).is_none());
        assert!(merkle_proof(&[], 0).is_none());
    }
}
