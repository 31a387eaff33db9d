// SPDX-License-Identifier: PMPL-1.0-or-later
//! Embedding derivation for drift scoring.
//!
//! Drift compares two modalities of one hexad in a common vector space.
//! The vector modality contributes its stored embedding directly; every
//! other modality is projected through a fallback chain: a character
//! fingerprint for documents, content-hash bytes where a hash exists,
//! size features as the last resort. The fingerprint functions are a
//! policy knob - the defaults below are what the scorer uses unless a
//! deployment overrides them.

use serde::{Deserialize, Serialize};

use verisim_model::{ModalityPayload, ModalityRecord};

/// Selects how non-vector modalities are projected into embedding space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPolicy {
    /// Document fingerprint, then hash bytes, then size features.
    #[default]
    Standard,
    /// Skip the document fingerprint; always derive from hash bytes.
    HashOnly,
}

/// Derive the drift embedding for one modality record.
pub fn derive_embedding(record: &ModalityRecord, policy: EmbeddingPolicy) -> Vec<f64> {
    match (&record.payload, policy) {
        (ModalityPayload::Vector { embedding, .. }, _) => {
            embedding.iter().map(|v| *v as f64).collect()
        }
        (ModalityPayload::Document { title, body, .. }, EmbeddingPolicy::Standard) => {
            char_fingerprint(&format!("{title}\n{body}"))
        }
        _ => hash_embedding(&record.content_hash)
            .unwrap_or_else(|| size_features(&record.payload)),
    }
}

/// 4-bin character-distribution fingerprint: fraction of letters, digits,
/// whitespace, and other characters.
pub fn char_fingerprint(text: &str) -> Vec<f64> {
    let mut bins = [0usize; 4];
    let mut total = 0usize;
    for ch in text.chars() {
        total += 1;
        if ch.is_alphabetic() {
            bins[0] += 1;
        } else if ch.is_ascii_digit() {
            bins[1] += 1;
        } else if ch.is_whitespace() {
            bins[2] += 1;
        } else {
            bins[3] += 1;
        }
    }
    if total == 0 {
        return vec![0.0; 4];
    }
    bins.iter().map(|b| *b as f64 / total as f64).collect()
}

/// First 8 bytes of a hex content hash, scaled into [0, 1].
fn hash_embedding(content_hash: &str) -> Option<Vec<f64>> {
    if content_hash.len() < 16 {
        return None;
    }
    let mut out = Vec::with_capacity(8);
    for i in 0..8 {
        let byte = u8::from_str_radix(&content_hash[i * 2..i * 2 + 2], 16).ok()?;
        out.push(byte as f64 / 255.0);
    }
    Some(out)
}

/// Length/size features for payloads with no hash.
fn size_features(payload: &ModalityPayload) -> Vec<f64> {
    let size = match payload {
        ModalityPayload::Graph { triples } => triples.len(),
        ModalityPayload::Vector { embedding, .. } => embedding.len(),
        ModalityPayload::Tensor { data, .. } => data.len(),
        ModalityPayload::Semantic { types, claims } => types.len() + claims.len(),
        ModalityPayload::Document { title, body, .. } => title.len() + body.len(),
        ModalityPayload::Temporal { versions } => versions.len(),
    };
    // Log-scaled size plus a constant component so empty payloads still
    // produce a nonzero vector.
    vec![((size as f64) + 1.0).ln(), 1.0]
}

/// Cosine similarity over f64 vectors. Dimension mismatches are reconciled
/// by truncation to the shorter length; degenerate vectors yield 0.0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let dot: f64 = a[..n].iter().zip(&b[..n]).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a[..n].iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b[..n].iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Euclidean distance over the shared prefix.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(payload: ModalityPayload) -> ModalityRecord {
        ModalityRecord {
            content_hash: payload.content_hash(),
            payload,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_vector_uses_stored_embedding() {
        let rec = record(ModalityPayload::Vector {
            embedding: vec![0.1, 0.2, 0.3],
            model: None,
        });
        let emb = derive_embedding(&rec, EmbeddingPolicy::Standard);
        assert_eq!(emb.len(), 3);
        assert!((emb[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_document_fingerprint_has_four_bins() {
        let rec = record(ModalityPayload::Document {
            title: "Alpha 1".to_string(),
            body: "two words".to_string(),
            fields: BTreeMap::new(),
        });
        let emb = derive_embedding(&rec, EmbeddingPolicy::Standard);
        assert_eq!(emb.len(), 4);
        let total: f64 = emb.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_identical_text_fingerprints_agree() {
        let a = char_fingerprint("shared text 123");
        let b = char_fingerprint("shared text 123");
        assert!(cosine_similarity(&a, &b) > 0.999);
    }

    #[test]
    fn test_graph_uses_hash_bytes() {
        let rec = record(ModalityPayload::Graph {
            triples: vec![verisim_model::GraphTriple::new("a", "knows", "b")],
        });
        let emb = derive_embedding(&rec, EmbeddingPolicy::Standard);
        assert_eq!(emb.len(), 8);
        assert!(emb.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
