// SPDX-License-Identifier: PMPL-1.0-or-later
//! Drift scores and consistency metrics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use verisim_model::{Hexad, Modality};

use crate::embedding::{cosine_similarity, derive_embedding, euclidean_distance, EmbeddingPolicy};

/// An unordered modality pair in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModalityPair(pub Modality, pub Modality);

impl ModalityPair {
    /// Canonicalize so (a, b) and (b, a) are the same pair.
    pub fn new(a: Modality, b: Modality) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    /// All distinct pairs over the configured modalities.
    pub fn all() -> Vec<ModalityPair> {
        let mut out = Vec::new();
        for (i, a) in Modality::ALL.iter().enumerate() {
            for b in &Modality::ALL[i + 1..] {
                out.push(ModalityPair(*a, *b));
            }
        }
        out
    }
}

impl std::fmt::Display for ModalityPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

/// Named similarity metric for `CONSISTENT(A, B) USING <metric>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMetric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
    Jaccard,
}

impl std::str::FromStr for ConsistencyMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "COSINE" => Ok(ConsistencyMetric::Cosine),
            "EUCLIDEAN" => Ok(ConsistencyMetric::Euclidean),
            "DOT_PRODUCT" => Ok(ConsistencyMetric::DotProduct),
            "JACCARD" => Ok(ConsistencyMetric::Jaccard),
            other => Err(format!("unknown consistency metric: {other}")),
        }
    }
}

/// Drift score between two modalities of a hexad.
///
/// `1 - cosine_similarity(emb(A), emb(B))`, clamped to [0, 1]. If either
/// modality is absent the score is 1.0 (maximum drift).
pub fn drift_score(hexad: &Hexad, a: Modality, b: Modality, policy: EmbeddingPolicy) -> f64 {
    let (Some(ra), Some(rb)) = (hexad.records.get(&a), hexad.records.get(&b)) else {
        return 1.0;
    };
    if ra.payload.is_empty() || rb.payload.is_empty() {
        return 1.0;
    }
    let ea = derive_embedding(ra, policy);
    let eb = derive_embedding(rb, policy);
    (1.0 - cosine_similarity(&ea, &eb)).clamp(0.0, 1.0)
}

/// Similarity between two modalities under a named metric, in [0, 1].
/// Absent modalities yield 0.0 (no evidence of consistency).
pub fn consistency(
    hexad: &Hexad,
    a: Modality,
    b: Modality,
    metric: ConsistencyMetric,
    policy: EmbeddingPolicy,
) -> f64 {
    let (Some(ra), Some(rb)) = (hexad.records.get(&a), hexad.records.get(&b)) else {
        return 0.0;
    };
    match metric {
        ConsistencyMetric::Cosine => {
            let ea = derive_embedding(ra, policy);
            let eb = derive_embedding(rb, policy);
            cosine_similarity(&ea, &eb).clamp(0.0, 1.0)
        }
        ConsistencyMetric::Euclidean => {
            let ea = derive_embedding(ra, policy);
            let eb = derive_embedding(rb, policy);
            1.0 / (1.0 + euclidean_distance(&ea, &eb))
        }
        ConsistencyMetric::DotProduct => {
            let ea = derive_embedding(ra, policy);
            let eb = derive_embedding(rb, policy);
            let n = ea.len().min(eb.len());
            let dot: f64 = ea[..n].iter().zip(&eb[..n]).map(|(x, y)| x * y).sum();
            sigmoid(dot)
        }
        ConsistencyMetric::Jaccard => {
            let keys_a: std::collections::BTreeSet<String> =
                ra.payload.fields().into_keys().collect();
            let keys_b: std::collections::BTreeSet<String> =
                rb.payload.fields().into_keys().collect();
            let union = keys_a.union(&keys_b).count();
            if union == 0 {
                return 0.0;
            }
            keys_a.intersection(&keys_b).count() as f64 / union as f64
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Pairwise drift matrix for one hexad.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftMatrix {
    scores: HashMap<ModalityPair, f64>,
}

impl DriftMatrix {
    /// Recompute every pair over the hexad's present modalities. Pairs with
    /// an absent side score 1.0 only when at least one side exists; fully
    /// absent pairs are skipped.
    pub fn compute(hexad: &Hexad, policy: EmbeddingPolicy) -> Self {
        let mut scores = HashMap::new();
        let present = hexad.present_modalities();
        for pair in ModalityPair::all() {
            if present.contains(&pair.0) || present.contains(&pair.1) {
                scores.insert(pair, drift_score(hexad, pair.0, pair.1, policy));
            }
        }
        Self { scores }
    }

    pub fn score(&self, a: Modality, b: Modality) -> Option<f64> {
        self.scores.get(&ModalityPair::new(a, b)).copied()
    }

    /// The worst (highest) score in the matrix.
    pub fn max_score(&self) -> Option<(ModalityPair, f64)> {
        self.scores
            .iter()
            .max_by(|x, y| x.1.partial_cmp(y.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(pair, score)| (*pair, *score))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModalityPair, &f64)> {
        self.scores.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
