// SPDX-License-Identifier: PMPL-1.0-or-later
//! Per-modality payloads.
//!
//! A hexad carries at most one payload per modality. Payloads are the
//! modality-store currency: the engine never interprets them beyond field
//! access, hashing, and the drift embedding derivations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::{Modality, Value};

/// A graph triple (subject, edge, object). Subject defaults to the owning
/// hexad id when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphTriple {
    pub subject: String,
    pub edge: String,
    pub object: String,
}

impl GraphTriple {
    pub fn new(subject: impl Into<String>, edge: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            edge: edge.into(),
            object: object.into(),
        }
    }
}

/// One entry of a temporal version chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStamp {
    /// Monotonic version number.
    pub version: u64,
    /// When the version was written.
    pub timestamp: DateTime<Utc>,
    /// Short description of the change (insert, update, repair, tombstone).
    pub change: String,
}

/// Payload of a single modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "modality")]
pub enum ModalityPayload {
    Graph {
        triples: Vec<GraphTriple>,
    },
    Vector {
        embedding: Vec<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Tensor {
        shape: Vec<usize>,
        data: Vec<f64>,
    },
    Semantic {
        /// Type IRIs.
        types: Vec<String>,
        /// Typed claims keyed by claim name. BTreeMap keeps hashing canonical.
        claims: BTreeMap<String, Value>,
    },
    Document {
        title: String,
        body: String,
        fields: BTreeMap<String, Value>,
    },
    Temporal {
        versions: Vec<VersionStamp>,
    },
}

impl ModalityPayload {
    /// Which modality this payload belongs to.
    pub fn modality(&self) -> Modality {
        match self {
            ModalityPayload::Graph { .. } => Modality::Graph,
            ModalityPayload::Vector { .. } => Modality::Vector,
            ModalityPayload::Tensor { .. } => Modality::Tensor,
            ModalityPayload::Semantic { .. } => Modality::Semantic,
            ModalityPayload::Document { .. } => Modality::Document,
            ModalityPayload::Temporal { .. } => Modality::Temporal,
        }
    }

    /// True when the payload carries no content.
    pub fn is_empty(&self) -> bool {
        match self {
            ModalityPayload::Graph { triples } => triples.is_empty(),
            ModalityPayload::Vector { embedding, .. } => embedding.is_empty(),
            ModalityPayload::Tensor { data, .. } => data.is_empty(),
            ModalityPayload::Semantic { types, claims } => types.is_empty() && claims.is_empty(),
            ModalityPayload::Document { title, body, fields } => {
                title.is_empty() && body.is_empty() && fields.is_empty()
            }
            ModalityPayload::Temporal { versions } => versions.is_empty(),
        }
    }

    /// Deterministic SHA-256 content hash, hex-encoded.
    ///
    /// Serialization is canonical: struct fields in declaration order, maps
    /// are BTreeMaps, so equal payloads hash equally.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex_encode(&digest)
    }

    /// Resolve a named field on this payload.
    ///
    /// Documents expose `title`, `body`, and their custom fields; semantic
    /// payloads expose claims by name plus `types`; the structural modalities
    /// expose size features. Unknown fields resolve to `Null` - the type
    /// checker decides whether that was legal.
    pub fn field(&self, name: &str) -> Value {
        match self {
            ModalityPayload::Document { title, body, fields } => match name {
                "title" => Value::Str(title.clone()),
                "body" => Value::Str(body.clone()),
                _ => fields.get(name).cloned().unwrap_or(Value::Null),
            },
            ModalityPayload::Semantic { types, claims } => match name {
                "types" => Value::Str(types.join(",")),
                _ => claims.get(name).cloned().unwrap_or(Value::Null),
            },
            ModalityPayload::Vector { embedding, model } => match name {
                "dimension" => Value::Int(embedding.len() as i64),
                "embedding" => Value::Vector(embedding.clone()),
                "model" => model.clone().map(Value::Str).unwrap_or(Value::Null),
                _ => Value::Null,
            },
            ModalityPayload::Tensor { shape, data } => match name {
                "rank" => Value::Int(shape.len() as i64),
                "size" => Value::Int(data.len() as i64),
                _ => Value::Null,
            },
            ModalityPayload::Graph { triples } => match name {
                "degree" => Value::Int(triples.len() as i64),
                _ => Value::Null,
            },
            ModalityPayload::Temporal { versions } => match name {
                "version" => versions
                    .last()
                    .map(|v| Value::Int(v.version as i64))
                    .unwrap_or(Value::Null),
                "count" => Value::Int(versions.len() as i64),
                _ => Value::Null,
            },
        }
    }

    /// All addressable fields with their values, used for `SELECT MOD`
    /// whole-modality projections.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        match self {
            ModalityPayload::Document { title, body, fields } => {
                out.insert("title".to_string(), Value::Str(title.clone()));
                out.insert("body".to_string(), Value::Str(body.clone()));
                for (k, v) in fields {
                    out.insert(k.clone(), v.clone());
                }
            }
            ModalityPayload::Semantic { types, claims } => {
                out.insert("types".to_string(), Value::Str(types.join(",")));
                for (k, v) in claims {
                    out.insert(k.clone(), v.clone());
                }
            }
            ModalityPayload::Vector { embedding, model } => {
                out.insert("dimension".to_string(), Value::Int(embedding.len() as i64));
                if let Some(m) = model {
                    out.insert("model".to_string(), Value::Str(m.clone()));
                }
            }
            ModalityPayload::Tensor { shape, data } => {
                out.insert("rank".to_string(), Value::Int(shape.len() as i64));
                out.insert("size".to_string(), Value::Int(data.len() as i64));
            }
            ModalityPayload::Graph { triples } => {
                out.insert("degree".to_string(), Value::Int(triples.len() as i64));
            }
            ModalityPayload::Temporal { versions } => {
                if let Some(v) = versions.last() {
                    out.insert("version".to_string(), Value::Int(v.version as i64));
                }
                out.insert("count".to_string(), Value::Int(versions.len() as i64));
            }
        }
        out
    }
}

/// Hex-encode a digest.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = ModalityPayload::Document {
            title: "X".to_string(),
            body: "body".to_string(),
            fields: BTreeMap::from([("severity".to_string(), Value::Int(5))]),
        };
        let b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_changes_with_content() {
        let a = ModalityPayload::Document {
            title: "X".to_string(),
            body: "body".to_string(),
            fields: BTreeMap::new(),
        };
        let b = ModalityPayload::Document {
            title: "Y".to_string(),
            body: "body".to_string(),
            fields: BTreeMap::new(),
        };
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_document_field_lookup() {
        let doc = ModalityPayload::Document {
            title: "X".to_string(),
            body: "b".to_string(),
            fields: BTreeMap::from([("severity".to_string(), Value::Int(5))]),
        };
        assert_eq!(doc.field("title"), Value::Str("X".to_string()));
        assert_eq!(doc.field("severity"), Value::Int(5));
        assert_eq!(doc.field("missing"), Value::Null);
    }

    #[test]
    fn test_vector_field_lookup() {
        let vec = ModalityPayload::Vector {
            embedding: vec![0.1, 0.2, 0.3],
            model: None,
        };
        assert_eq!(vec.field("dimension"), Value::Int(3));
        assert!(vec.field("model").is_null());
    }

    #[test]
    fn test_empty_detection() {
        let p = ModalityPayload::Graph { triples: vec![] };
        assert!(p.is_empty());
        let p = ModalityPayload::Graph {
            triples: vec![GraphTriple::new("a", "knows", "b")],
        };
        assert!(!p.is_empty());
    }
}
