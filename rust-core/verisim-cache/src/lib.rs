// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Query Cache
//!
//! Three logical layers: L1 (hot, in-process), L2 (node-local), L3
//! (persisted on the temporal store). GET walks L1 -> L2 -> L3 and promotes
//! found entries toward L1; invalidation is by exact key or by tag and
//! reaches every layer. Entries carry TTLs from per-class policies; L1 runs
//! LRU eviction under its byte budget.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

mod layer;

pub use layer::{CacheLayer, MemoryCacheLayer};

/// Cache errors
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Entry of {size} bytes exceeds the layer budget of {budget} bytes")]
    EntryTooLarge { size: usize, budget: usize },

    #[error("Proof results are not cacheable under this policy")]
    ProofCachingDenied,

    #[error("Internal cache error: {0}")]
    Internal(String),
}

/// Well-known tag builders. Invalidation is tag-driven; producers tag
/// entries with every hexad, modality, and federation pattern they depend
/// on.
pub mod tags {
    pub fn hexad(id: &str) -> String {
        format!("hexad:{id}")
    }

    pub fn modality(name: &str) -> String {
        format!("modality:{name}")
    }

    pub fn federation(pattern: &str) -> String {
        format!("federation:{pattern}")
    }

    pub const AST: &str = "ast";
    pub const PLAN: &str = "plan";
    pub const ZKP: &str = "zkp";
}

/// Per-class caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl_seconds: i64,
    /// Whether dependent-type (PROOF) results may be cached.
    pub allow_proof_results: bool,
}

impl CachePolicy {
    /// Short TTL, no proof results.
    pub fn strict() -> Self {
        Self {
            ttl_seconds: 30,
            allow_proof_results: false,
        }
    }

    /// Medium TTL, proof results allowed.
    pub fn relaxed() -> Self {
        Self {
            ttl_seconds: 300,
            allow_proof_results: true,
        }
    }

    /// Long TTL - the slipstream default.
    pub fn aggressive() -> Self {
        Self {
            ttl_seconds: 3600,
            allow_proof_results: true,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::relaxed()
    }
}

/// One cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Approximate in-memory size in bytes.
    pub size: usize,
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        policy: CachePolicy,
        tags: Vec<String>,
    ) -> Self {
        let created_at = Utc::now();
        let size = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        Self {
            key: key.into(),
            value,
            created_at,
            expires_at: created_at + Duration::seconds(policy.ttl_seconds),
            size,
            tags,
        }
    }

    /// Override the size estimate (tests, preserialized values).
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Which layers a PUT writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutTarget {
    L1Only,
    L1AndL2,
    AllLayers,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
    /// Bumped on every mutation.
    pub generation: u64,
}

/// The multi-layer cache.
pub struct MultiLayerCache {
    l1: Arc<dyn CacheLayer>,
    l2: Arc<dyn CacheLayer>,
    l3: Option<Arc<dyn CacheLayer>>,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
    generation: AtomicU64,
}

impl MultiLayerCache {
    pub fn new(
        l1: Arc<dyn CacheLayer>,
        l2: Arc<dyn CacheLayer>,
        l3: Option<Arc<dyn CacheLayer>>,
    ) -> Self {
        Self {
            l1,
            l2,
            l3,
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            l3_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// In-process L1 + L2 with default budgets, no persistence.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCacheLayer::new("l1", 16 * 1024 * 1024)),
            Arc::new(MemoryCacheLayer::new("l2", 64 * 1024 * 1024)),
            None,
        )
    }

    /// GET: walk L1 -> L2 -> L3, promoting hits toward L1.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        if let Some(entry) = self.l1.get(key).await? {
            self.l1_hits.fetch_add(1, Ordering::SeqCst);
            return Ok(Some(entry));
        }
        if let Some(entry) = self.l2.get(key).await? {
            self.l2_hits.fetch_add(1, Ordering::SeqCst);
            let _ = self.l1.put(entry.clone()).await;
            debug!(key, "promoted l2 -> l1");
            return Ok(Some(entry));
        }
        if let Some(l3) = &self.l3 {
            if let Some(entry) = l3.get(key).await? {
                self.l3_hits.fetch_add(1, Ordering::SeqCst);
                let _ = self.l2.put(entry.clone()).await;
                let _ = self.l1.put(entry.clone()).await;
                debug!(key, "promoted l3 -> l1");
                return Ok(Some(entry));
            }
        }
        self.misses.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    /// PUT to the requested layers. `is_proof_result` entries are refused
    /// unless the policy permits them.
    pub async fn put(
        &self,
        entry: CacheEntry,
        target: PutTarget,
        policy: CachePolicy,
        is_proof_result: bool,
    ) -> Result<(), CacheError> {
        if is_proof_result && !policy.allow_proof_results {
            return Err(CacheError::ProofCachingDenied);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.l1.put(entry.clone()).await?;
        if matches!(target, PutTarget::L1AndL2 | PutTarget::AllLayers) {
            self.l2.put(entry.clone()).await?;
        }
        if target == PutTarget::AllLayers {
            if let Some(l3) = &self.l3 {
                l3.put(entry).await?;
            }
        }
        Ok(())
    }

    /// Remove an exact key from every layer.
    pub async fn invalidate_key(&self, key: &str) -> Result<(), CacheError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.l1.remove(key).await?;
        self.l2.remove(key).await?;
        if let Some(l3) = &self.l3 {
            l3.remove(key).await?;
        }
        Ok(())
    }

    /// Remove every entry carrying the tag from every layer.
    #[instrument(skip(self))]
    pub async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut removed = self.l1.invalidate_tag(tag).await?;
        removed += self.l2.invalidate_tag(tag).await?;
        if let Some(l3) = &self.l3 {
            removed += l3.invalidate_tag(tag).await?;
        }
        debug!(tag, removed, "tag invalidation");
        Ok(removed)
    }

    /// Invalidate a batch of tags (mutation paths emit several at once).
    pub async fn invalidate_tags(&self, tags: &[String]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for tag in tags {
            removed += self.invalidate_tag(tag).await?;
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.l1.clear().await?;
        self.l2.clear().await?;
        if let Some(l3) = &self.l3 {
            l3.clear().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let l1_hits = self.l1_hits.load(Ordering::SeqCst);
        let l2_hits = self.l2_hits.load(Ordering::SeqCst);
        let l3_hits = self.l3_hits.load(Ordering::SeqCst);
        let misses = self.misses.load(Ordering::SeqCst);
        let hits = l1_hits + l2_hits + l3_hits;
        let lookups = hits + misses;
        CacheStats {
            l1_hits,
            l2_hits,
            l3_hits,
            misses,
            evictions: self.l1.eviction_count()
                + self.l2.eviction_count()
                + self.l3.as_ref().map(|l| l.eviction_count()).unwrap_or(0),
            hit_ratio: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            generation: self.generation.load(Ordering::SeqCst),
        }
    }
}

/// Normalize and fingerprint query text into a cache key: whitespace
/// collapsed, keywords uppercased by case-folding, SHA-256 hex digest.
pub fn fingerprint(query_text: &str) -> String {
    let normalized: String = query_text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
