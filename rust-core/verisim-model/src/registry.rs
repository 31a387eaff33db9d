// SPDX-License-Identifier: PMPL-1.0-or-later
//! Hexad registry - which store owns which modality of which hexad.
//!
//! Standalone deployments back this with a local map; federated deployments
//! rebuild it by applying committed metadata-log commands in order. Either
//! way the registry is a plain state machine - callers own the locking.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{HexadId, Modality};

/// Where one modality of one hexad lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityLocation {
    pub modality: Modality,
    pub store_id: String,
}

/// Registry state: hexad id to per-modality owning store, plus tombstones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HexadRegistry {
    locations: HashMap<HexadId, BTreeMap<Modality, String>>,
    tombstones: HashSet<HexadId>,
}

impl HexadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `store_id` owns `modality` for `id`.
    pub fn map_hexad(&mut self, id: HexadId, modality: Modality, store_id: impl Into<String>) {
        self.locations
            .entry(id)
            .or_default()
            .insert(modality, store_id.into());
    }

    /// Remove a modality mapping; drops the hexad entry when it empties.
    pub fn unmap_hexad(&mut self, id: &HexadId, modality: Modality) {
        if let Some(map) = self.locations.get_mut(id) {
            map.remove(&modality);
            if map.is_empty() {
                self.locations.remove(id);
            }
        }
    }

    /// Owning store for one modality of a hexad.
    pub fn owning_store(&self, id: &HexadId, modality: Modality) -> Option<&str> {
        self.locations
            .get(id)
            .and_then(|m| m.get(&modality))
            .map(String::as_str)
    }

    /// Distinct stores that must be contacted to cover `modalities` for `id`.
    pub fn stores_for(&self, id: &HexadId, modalities: &[Modality]) -> Vec<String> {
        let Some(map) = self.locations.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<String> = Vec::new();
        for m in modalities {
            if let Some(store) = map.get(m) {
                if !out.iter().any(|s| s == store) {
                    out.push(store.clone());
                }
            }
        }
        out
    }

    /// All modality locations for a hexad.
    pub fn locations(&self, id: &HexadId) -> Vec<ModalityLocation> {
        self.locations
            .get(id)
            .map(|m| {
                m.iter()
                    .map(|(modality, store_id)| ModalityLocation {
                        modality: *modality,
                        store_id: store_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark a hexad tombstoned. The mapping stays until physical removal.
    pub fn tombstone(&mut self, id: HexadId) {
        self.tombstones.insert(id);
    }

    pub fn is_tombstoned(&self, id: &HexadId) -> bool {
        self.tombstones.contains(id)
    }

    /// Known, non-tombstoned hexad ids in deterministic order.
    pub fn ids(&self) -> Vec<HexadId> {
        let mut ids: Vec<HexadId> = self
            .locations
            .keys()
            .filter(|id| !self.tombstones.contains(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_and_resolve() {
        let mut reg = HexadRegistry::new();
        let id = HexadId::new("ent-1");
        reg.map_hexad(id.clone(), Modality::Document, "store-a");
        reg.map_hexad(id.clone(), Modality::Vector, "store-b");

        assert_eq!(reg.owning_store(&id, Modality::Document), Some("store-a"));
        assert_eq!(reg.owning_store(&id, Modality::Vector), Some("store-b"));
        assert_eq!(reg.owning_store(&id, Modality::Graph), None);

        let stores = reg.stores_for(&id, &[Modality::Document, Modality::Vector, Modality::Graph]);
        assert_eq!(stores, vec!["store-a".to_string(), "store-b".to_string()]);
    }

    #[test]
    fn test_stores_deduplicated() {
        let mut reg = HexadRegistry::new();
        let id = HexadId::new("ent-1");
        reg.map_hexad(id.clone(), Modality::Document, "store-a");
        reg.map_hexad(id.clone(), Modality::Vector, "store-a");
        let stores = reg.stores_for(&id, &[Modality::Document, Modality::Vector]);
        assert_eq!(stores.len(), 1);
    }

    #[test]
    fn test_unmap_drops_empty_entry() {
        let mut reg = HexadRegistry::new();
        let id = HexadId::new("ent-1");
        reg.map_hexad(id.clone(), Modality::Document, "store-a");
        reg.unmap_hexad(&id, Modality::Document);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_tombstones_hide_from_ids() {
        let mut reg = HexadRegistry::new();
        let a = HexadId::new("ent-a");
        let b = HexadId::new("ent-b");
        reg.map_hexad(a.clone(), Modality::Document, "s");
        reg.map_hexad(b.clone(), Modality::Document, "s");
        reg.tombstone(a.clone());

        assert!(reg.is_tombstoned(&a));
        assert_eq!(reg.ids(), vec![b]);
    }
}
