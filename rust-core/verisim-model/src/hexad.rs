// SPDX-License-Identifier: PMPL-1.0-or-later
//! The Hexad entity and its per-modality records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{HexadId, Modality, ModalityPayload, ModelError, Value};

/// One modality's slot on a hexad: payload plus the bookkeeping the
/// consistency invariants need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityRecord {
    pub payload: ModalityPayload,
    /// Monotonic last-write version counter.
    pub version: u64,
    /// Hex-encoded SHA-256 of the payload.
    pub content_hash: String,
    /// When this modality was last written.
    pub updated_at: DateTime<Utc>,
}

/// A complete Hexad entity.
///
/// The id is immutable. Modalities may be absent. Deletion tombstones the
/// hexad; physical removal is deferred to the temporal log's discretion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hexad {
    pub id: HexadId,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub records: BTreeMap<Modality, ModalityRecord>,
    pub tombstoned: bool,
}

impl Hexad {
    /// Create an empty hexad.
    pub fn new(id: HexadId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            modified_at: now,
            records: BTreeMap::new(),
            tombstoned: false,
        }
    }

    /// Write a payload, bumping the modality's version counter.
    ///
    /// Version counters only move forward; the content hash is recomputed on
    /// every write.
    pub fn put(&mut self, payload: ModalityPayload) -> u64 {
        let modality = payload.modality();
        let next_version = self.records.get(&modality).map(|r| r.version + 1).unwrap_or(1);
        let content_hash = payload.content_hash();
        let now = Utc::now();
        self.records.insert(
            modality,
            ModalityRecord {
                payload,
                version: next_version,
                content_hash,
                updated_at: now,
            },
        );
        self.modified_at = now;
        next_version
    }

    /// Write a payload at an externally supplied version (store replication).
    pub fn put_versioned(&mut self, payload: ModalityPayload, version: u64) -> Result<(), ModelError> {
        let modality = payload.modality();
        if let Some(existing) = self.records.get(&modality) {
            if version <= existing.version {
                return Err(ModelError::VersionRegression {
                    modality,
                    current: existing.version,
                    proposed: version,
                });
            }
        }
        let content_hash = payload.content_hash();
        let now = Utc::now();
        self.records.insert(
            modality,
            ModalityRecord {
                payload,
                version,
                content_hash,
                updated_at: now,
            },
        );
        self.modified_at = now;
        Ok(())
    }

    /// Payload for a modality, if present.
    pub fn payload(&self, modality: Modality) -> Option<&ModalityPayload> {
        self.records.get(&modality).map(|r| &r.payload)
    }

    /// Version counter for a modality (0 when absent).
    pub fn version(&self, modality: Modality) -> u64 {
        self.records.get(&modality).map(|r| r.version).unwrap_or(0)
    }

    /// Content hash for a modality, if present.
    pub fn content_hash(&self, modality: Modality) -> Option<&str> {
        self.records.get(&modality).map(|r| r.content_hash.as_str())
    }

    /// Resolve `modality.field` to a value (`Null` when absent).
    pub fn field(&self, modality: Modality, field: &str) -> Value {
        self.payload(modality)
            .map(|p| p.field(field))
            .unwrap_or(Value::Null)
    }

    /// Modalities present with non-empty payloads.
    pub fn present_modalities(&self) -> Vec<Modality> {
        self.records
            .iter()
            .filter(|(_, r)| !r.payload.is_empty())
            .map(|(m, _)| *m)
            .collect()
    }

    /// True when the modality is present and non-empty.
    pub fn has(&self, modality: Modality) -> bool {
        self.records
            .get(&modality)
            .map(|r| !r.payload.is_empty())
            .unwrap_or(false)
    }

    /// Modalities missing from the hexad.
    pub fn missing_modalities(&self) -> Vec<Modality> {
        Modality::ALL.iter().copied().filter(|m| !self.has(*m)).collect()
    }

    /// Logically delete. Readable only through the temporal log afterwards.
    pub fn tombstone(&mut self) {
        self.tombstoned = true;
        self.modified_at = Utc::now();
    }
}

/// Builder for assembling hexads in tests and ingestion paths.
pub struct HexadBuilder {
    hexad: Hexad,
}

impl HexadBuilder {
    pub fn new(id: impl Into<HexadId>) -> Self {
        Self {
            hexad: Hexad::new(id.into()),
        }
    }

    pub fn with_payload(mut self, payload: ModalityPayload) -> Self {
        self.hexad.put(payload);
        self
    }

    pub fn with_document(self, title: &str, body: &str) -> Self {
        self.with_payload(ModalityPayload::Document {
            title: title.to_string(),
            body: body.to_string(),
            fields: BTreeMap::new(),
        })
    }

    pub fn with_document_field(mut self, name: &str, value: Value) -> Self {
        if let Some(record) = self.hexad.records.get(&Modality::Document).cloned() {
            if let ModalityPayload::Document { title, body, mut fields } = record.payload {
                fields.insert(name.to_string(), value);
                self.hexad.put(ModalityPayload::Document { title, body, fields });
                return self;
            }
        }
        self.with_payload(ModalityPayload::Document {
            title: String::new(),
            body: String::new(),
            fields: BTreeMap::from([(name.to_string(), value)]),
        })
    }

    pub fn with_embedding(self, embedding: Vec<f32>) -> Self {
        self.with_payload(ModalityPayload::Vector {
            embedding,
            model: None,
        })
    }

    pub fn with_triples(self, triples: Vec<crate::GraphTriple>) -> Self {
        self.with_payload(ModalityPayload::Graph { triples })
    }

    pub fn with_claims(self, types: Vec<&str>, claims: Vec<(&str, Value)>) -> Self {
        self.with_payload(ModalityPayload::Semantic {
            types: types.into_iter().map(String::from).collect(),
            claims: claims
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }

    pub fn with_tensor(self, shape: Vec<usize>, data: Vec<f64>) -> Self {
        self.with_payload(ModalityPayload::Tensor { shape, data })
    }

    pub fn build(self) -> Hexad {
        self.hexad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_monotonicity() {
        let mut hexad = Hexad::new(HexadId::new("ent-1"));
        let v1 = hexad.put(ModalityPayload::Document {
            title: "a".to_string(),
            body: String::new(),
            fields: BTreeMap::new(),
        });
        let v2 = hexad.put(ModalityPayload::Document {
            title: "b".to_string(),
            body: String::new(),
            fields: BTreeMap::new(),
        });
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(hexad.version(Modality::Document), 2);
    }

    #[test]
    fn test_put_versioned_rejects_regression() {
        let mut hexad = Hexad::new(HexadId::new("ent-1"));
        hexad
            .put_versioned(ModalityPayload::Graph { triples: vec![] }, 5)
            .unwrap();
        let err = hexad
            .put_versioned(ModalityPayload::Graph { triples: vec![] }, 3)
            .unwrap_err();
        assert!(matches!(err, ModelError::VersionRegression { .. }));
    }

    #[test]
    fn test_content_hash_tracks_payload() {
        let mut hexad = Hexad::new(HexadId::new("ent-1"));
        hexad.put(ModalityPayload::Document {
            title: "a".to_string(),
            body: String::new(),
            fields: BTreeMap::new(),
        });
        let h1 = hexad.content_hash(Modality::Document).unwrap().to_string();
        hexad.put(ModalityPayload::Document {
            title: "b".to_string(),
            body: String::new(),
            fields: BTreeMap::new(),
        });
        let h2 = hexad.content_hash(Modality::Document).unwrap().to_string();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_builder_and_field_access() {
        let hexad = HexadBuilder::new("ent-1")
            .with_document("X", "text")
            .with_document_field("severity", Value::Int(5))
            .with_embedding(vec![0.1, 0.2, 0.3])
            .build();

        assert_eq!(hexad.field(Modality::Document, "title"), Value::Str("X".into()));
        assert_eq!(hexad.field(Modality::Document, "severity"), Value::Int(5));
        assert_eq!(hexad.field(Modality::Vector, "dimension"), Value::Int(3));
        assert!(hexad.field(Modality::Tensor, "rank").is_null());
        assert_eq!(hexad.present_modalities(), vec![Modality::Vector, Modality::Document]);
    }

    #[test]
    fn test_tombstone() {
        let mut hexad = Hexad::new(HexadId::new("ent-1"));
        assert!(!hexad.tombstoned);
        hexad.tombstone();
        assert!(hexad.tombstoned);
    }
}
