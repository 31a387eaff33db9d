// SPDX-License-Identifier: PMPL-1.0-or-later
//! In-memory reference store.
//!
//! Backs tests, development, and standalone deployments. Thread-safe via
//! `Arc<RwLock<BTreeMap>>`; the BTreeMap ordering gives scans their
//! deterministic hexad-id order. Carries a fault-injection knob so the saga
//! and circuit-breaker paths can be exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use verisim_model::{HexadId, Modality, ModalityPayload};

use crate::{ModalityStore, ScanRow, StoreError, StorePredicate};

type Shelf = BTreeMap<HexadId, BTreeMap<Modality, (ModalityPayload, u64)>>;

/// In-memory modality store.
#[derive(Clone)]
pub struct InMemoryModalityStore {
    store_id: String,
    modalities: Vec<Modality>,
    data: Arc<RwLock<Shelf>>,
    /// Number of puts accepted so far.
    put_count: Arc<AtomicU64>,
    /// Fault injection: fail every put once `put_count` reaches this value.
    fail_puts_after: Arc<AtomicU64>,
}

impl InMemoryModalityStore {
    /// Create a store serving the given modalities.
    pub fn new(store_id: impl Into<String>, modalities: Vec<Modality>) -> Self {
        Self {
            store_id: store_id.into(),
            modalities,
            data: Arc::new(RwLock::new(BTreeMap::new())),
            put_count: Arc::new(AtomicU64::new(0)),
            fail_puts_after: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    /// Create a store serving every modality.
    pub fn full(store_id: impl Into<String>) -> Self {
        Self::new(store_id, Modality::ALL.to_vec())
    }

    /// Fault injection: accept `n` puts, then fail each subsequent one with
    /// `Unavailable`. Used by saga-rollback and breaker tests.
    pub fn fail_puts_after(&self, n: u64) {
        self.fail_puts_after.store(n, Ordering::SeqCst);
    }

    /// Number of hexads currently stored.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn check_serves(&self, modality: Modality) -> Result<(), StoreError> {
        if self.modalities.contains(&modality) {
            Ok(())
        } else {
            Err(StoreError::ModalityNotServed {
                store_id: self.store_id.clone(),
                modality,
            })
        }
    }
}

#[async_trait]
impl ModalityStore for InMemoryModalityStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn advertise(&self) -> Vec<Modality> {
        self.modalities.clone()
    }

    async fn put(
        &self,
        id: &HexadId,
        payload: ModalityPayload,
        version: u64,
    ) -> Result<(), StoreError> {
        let modality = payload.modality();
        self.check_serves(modality)?;

        let accepted = self.put_count.fetch_add(1, Ordering::SeqCst);
        if accepted >= self.fail_puts_after.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(self.store_id.clone()));
        }

        let mut data = self.data.write().await;
        let slots = data.entry(id.clone()).or_default();
        if let Some((_, current)) = slots.get(&modality) {
            if version <= *current {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    modality,
                    current: *current,
                    proposed: version,
                });
            }
        }
        debug!(store = %self.store_id, %id, %modality, version, "put");
        slots.insert(modality, (payload, version));
        Ok(())
    }

    async fn get(
        &self,
        id: &HexadId,
        modality: Modality,
    ) -> Result<Option<(ModalityPayload, u64)>, StoreError> {
        self.check_serves(modality)?;
        let data = self.data.read().await;
        Ok(data.get(id).and_then(|slots| slots.get(&modality).cloned()))
    }

    async fn scan(
        &self,
        predicate: &StorePredicate,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScanRow>, StoreError> {
        let data = self.data.read().await;
        let mut rows = Vec::new();
        for (id, slots) in data.iter() {
            let lookup = |m: Modality| slots.get(&m).map(|(p, _)| p);
            if !predicate.matches(&lookup) {
                continue;
            }
            for (modality, (payload, version)) in slots {
                rows.push(ScanRow {
                    id: id.clone(),
                    modality: *modality,
                    payload: payload.clone(),
                    version: *version,
                });
            }
        }
        // BTreeMap iteration is already id-ordered; offset/limit count hexads,
        // not rows, so group boundaries stay intact.
        let mut out = Vec::new();
        let mut seen_ids = 0usize;
        let mut last_id: Option<&HexadId> = None;
        for row in &rows {
            if last_id != Some(&row.id) {
                seen_ids += 1;
                last_id = Some(&row.id);
            }
            if seen_ids <= offset {
                continue;
            }
            if limit > 0 && seen_ids > offset + limit {
                break;
            }
            out.push(row.clone());
        }
        Ok(out)
    }

    async fn delete(&self, id: &HexadId) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.remove(id);
        debug!(store = %self.store_id, %id, "delete");
        Ok(())
    }

    async fn content_hash(
        &self,
        id: &HexadId,
        modality: Modality,
    ) -> Result<Option<String>, StoreError> {
        self.check_serves(modality)?;
        let data = self.data.read().await;
        Ok(data
            .get(id)
            .and_then(|slots| slots.get(&modality))
            .map(|(payload, _)| payload.content_hash()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use verisim_model::{CmpOp, Value};

    fn doc(title: &str, severity: i64) -> ModalityPayload {
        ModalityPayload::Document {
            title: title.to_string(),
            body: String::new(),
            fields: Map::from([("severity".to_string(), Value::Int(severity))]),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = InMemoryModalityStore::full("s1");
        let id = HexadId::new("ent-1");
        store.put(&id, doc("X", 5), 1).await.unwrap();

        let (payload, version) = store.get(&id, Modality::Document).await.unwrap().unwrap();
        assert_eq!(version, 1);
        assert_eq!(payload.field("title"), Value::Str("X".to_string()));
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let store = InMemoryModalityStore::full("s1");
        let id = HexadId::new("ent-1");
        store.put(&id, doc("X", 5), 2).await.unwrap();
        let err = store.put(&id, doc("Y", 6), 2).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(err.recoverable());
    }

    #[tokio::test]
    async fn test_modality_not_served() {
        let store = InMemoryModalityStore::new("s1", vec![Modality::Vector]);
        let id = HexadId::new("ent-1");
        let err = store.put(&id, doc("X", 5), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::ModalityNotServed { .. }));
    }

    #[tokio::test]
    async fn test_scan_is_ordered_and_filtered() {
        let store = InMemoryModalityStore::full("s1");
        for (id, sev) in [("ent-c", 1), ("ent-a", 5), ("ent-b", 9)] {
            store.put(&HexadId::new(id), doc(id, sev), 1).await.unwrap();
        }

        let pred = StorePredicate::Field(crate::FieldPredicate::Compare {
            modality: Modality::Document,
            field: "severity".to_string(),
            op: CmpOp::Gt,
            value: Value::Int(3),
        });
        let rows = store.scan(&pred, 10, 0).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ent-a", "ent-b"]);
    }

    #[tokio::test]
    async fn test_scan_offset_limit() {
        let store = InMemoryModalityStore::full("s1");
        for id in ["a", "b", "c", "d"] {
            store.put(&HexadId::new(id), doc(id, 1), 1).await.unwrap();
        }
        let rows = store.scan(&StorePredicate::True, 2, 1).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryModalityStore::full("s1");
        store.fail_puts_after(1);
        let id = HexadId::new("ent-1");
        store.put(&id, doc("X", 1), 1).await.unwrap();
        let err = store.put(&id, doc("Y", 2), 2).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_content_hash_matches_payload() {
        let store = InMemoryModalityStore::full("s1");
        let id = HexadId::new("ent-1");
        let payload = doc("X", 5);
        let expected = payload.content_hash();
        store.put(&id, payload, 1).await.unwrap();
        let hash = store.content_hash(&id, Modality::Document).await.unwrap().unwrap();
        assert_eq!(hash, expected);
    }
}
