// SPDX-License-Identifier: PMPL-1.0-or-later
//! Peer registry.
//!
//! Peers are federated VeriSimDB instances. The registry tracks identity,
//! advertised modalities, trust, and liveness bookkeeping; glob patterns
//! from `FEDERATION <glob>` sources resolve against it.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use verisim_model::Modality;

/// A registered peer store in the federation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStore {
    /// Unique store identifier.
    pub store_id: String,
    /// Endpoint URL.
    pub endpoint: String,
    /// Modalities this peer can answer.
    pub modalities: Vec<Modality>,
    /// Trust score in [0, 1].
    pub trust: f64,
    /// Last heartbeat or successful response.
    pub last_seen: Option<DateTime<Utc>>,
    /// Last measured response latency.
    pub latency_ms: Option<u64>,
}

impl PeerStore {
    pub fn new(store_id: impl Into<String>, endpoint: impl Into<String>, modalities: Vec<Modality>) -> Self {
        Self {
            store_id: store_id.into(),
            endpoint: endpoint.into(),
            modalities,
            trust: 1.0,
            last_seen: None,
            latency_ms: None,
        }
    }

    /// Whether the peer can answer every required modality.
    pub fn covers(&self, required: &[Modality]) -> bool {
        required.iter().all(|m| self.modalities.contains(m))
    }
}

/// Match a federation glob against a store id. `*` matches everything;
/// other patterns treat `*` as a path wildcard.
pub fn pattern_matches(pattern: &str, store_id: &str) -> bool {
    if pattern == "*" || pattern == "/*" {
        return true;
    }
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    match Regex::new(&format!("^{escaped}$")) {
        Ok(re) => re.is_match(store_id),
        Err(_) => pattern == store_id,
    }
}

/// The in-memory peer registry.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerStore>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: PeerStore) {
        info!(store_id = %peer.store_id, "peer registered");
        self.peers.insert(peer.store_id.clone(), peer);
    }

    pub fn remove(&mut self, store_id: &str) -> Option<PeerStore> {
        let removed = self.peers.remove(store_id);
        if removed.is_some() {
            info!(store_id, "peer removed");
        }
        removed
    }

    pub fn get(&self, store_id: &str) -> Option<&PeerStore> {
        self.peers.get(store_id)
    }

    pub fn set_trust(&mut self, store_id: &str, trust: f64) {
        if let Some(peer) = self.peers.get_mut(store_id) {
            peer.trust = trust.clamp(0.0, 1.0);
        }
    }

    pub fn heartbeat(&mut self, store_id: &str, latency_ms: Option<u64>) {
        if let Some(peer) = self.peers.get_mut(store_id) {
            peer.last_seen = Some(Utc::now());
            if latency_ms.is_some() {
                peer.latency_ms = latency_ms;
            }
        }
    }

    /// Resolve a glob to peers covering the required modalities at or above
    /// the trust floor, in deterministic store-id order.
    pub fn resolve(
        &self,
        pattern: &str,
        required_modalities: &[Modality],
        min_trust: f64,
    ) -> Vec<PeerStore> {
        let mut matched: Vec<PeerStore> = self
            .peers
            .values()
            .filter(|p| pattern_matches(pattern, &p.store_id))
            .filter(|p| p.covers(required_modalities))
            .filter(|p| p.trust >= min_trust)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.store_id.cmp(&b.store_id));
        matched
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerStore> {
        self.peers.values()
    }
}
