// SPDX-License-Identifier: PMPL-1.0-or-later
//! Derivation functions.
//!
//! Repair rewrites a drifted modality with a value freshly derived from the
//! authoritative one. Derivations are deterministic, so repair is idempotent
//! and a repaired modality's content hash always equals the hash of the
//! authority's derivation.

use std::collections::BTreeMap;

use verisim_drift::char_fingerprint;
use verisim_model::{Modality, ModalityPayload, Value, VersionStamp};

/// Derive a payload for `target` from the authoritative payload.
///
/// Returns `None` when no derivation exists for the pair - the repair then
/// fails rather than guessing.
pub fn derive(authority: &ModalityPayload, target: Modality) -> Option<ModalityPayload> {
    match (authority, target) {
        // Re-embed a document's text into the vector store.
        (ModalityPayload::Document { title, body, .. }, Modality::Vector) => {
            let embedding = char_fingerprint(&format!("{title}\n{body}"))
                .into_iter()
                .map(|v| v as f32)
                .collect();
            Some(ModalityPayload::Vector {
                embedding,
                model: Some("fingerprint-4bin".to_string()),
            })
        }
        // Distill a document into typed claims.
        (ModalityPayload::Document { title, fields, .. }, Modality::Semantic) => {
            let mut claims: BTreeMap<String, Value> = fields.clone();
            claims.insert("title".to_string(), Value::Str(title.clone()));
            Some(ModalityPayload::Semantic {
                types: Vec::new(),
                claims,
            })
        }
        // Project the document fingerprint into a rank-1 tensor.
        (ModalityPayload::Document { title, body, .. }, Modality::Tensor) => {
            let data = char_fingerprint(&format!("{title}\n{body}"));
            Some(ModalityPayload::Tensor {
                shape: vec![data.len()],
                data,
            })
        }
        // An embedding flattens to a rank-1 tensor.
        (ModalityPayload::Vector { embedding, .. }, Modality::Tensor) => Some(ModalityPayload::Tensor {
            shape: vec![embedding.len()],
            data: embedding.iter().map(|v| *v as f64).collect(),
        }),
        // A tensor's data re-enters vector space directly.
        (ModalityPayload::Tensor { data, .. }, Modality::Vector) => Some(ModalityPayload::Vector {
            embedding: data.iter().map(|v| *v as f32).collect(),
            model: Some("tensor-flatten".to_string()),
        }),
        // Claims render back into a skeletal document.
        (ModalityPayload::Semantic { claims, .. }, Modality::Document) => {
            let title = claims
                .get("title")
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            let mut fields = claims.clone();
            fields.remove("title");
            Some(ModalityPayload::Document {
                title,
                body: String::new(),
                fields,
            })
        }
        // Anything derives an empty fresh version chain entry.
        (_, Modality::Temporal) => Some(ModalityPayload::Temporal {
            versions: vec![VersionStamp {
                version: 1,
                timestamp: chrono::Utc::now(),
                change: "repair".to_string(),
            }],
        }),
        _ => None,
    }
}

/// Whether a derivation exists for (authority, target).
pub fn derivable(authority: &ModalityPayload, target: Modality) -> bool {
    // Temporal derivations are timestamped and therefore not idempotent;
    // they are excluded from the derivability check used by repair.
    target != Modality::Temporal && derive(authority, target).is_some()
}
