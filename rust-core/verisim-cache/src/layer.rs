// SPDX-License-Identifier: PMPL-1.0-or-later
//! Cache layers.
//!
//! One trait for all three layers; the in-memory implementation backs L1
//! and L2 directly, and stands in for L3 wherever the temporal store is not
//! wired up. The L1 instance runs under a byte budget with LRU eviction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{CacheEntry, CacheError};

/// One layer of the cache hierarchy.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Layer name for logging and stats (`l1`, `l2`, `l3`).
    fn name(&self) -> &str;

    /// Fetch a live (unexpired) entry. Expired entries are dropped on read.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, evicting as needed.
    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove one key. Returns whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry carrying the tag; returns removed count.
    async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError>;

    /// Drop everything.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Entry count.
    async fn len(&self) -> usize;

    /// Evictions performed so far.
    fn eviction_count(&self) -> u64;
}

struct Slot {
    entry: CacheEntry,
    last_access: u64,
}

/// In-memory layer with TTL expiry and LRU eviction under a byte budget.
pub struct MemoryCacheLayer {
    name: String,
    /// Memory budget in bytes; eviction triggers before exceeding it.
    max_bytes: usize,
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    clock: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCacheLayer {
    pub fn new(name: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            name: name.into(),
            max_bytes,
            slots: Arc::new(RwLock::new(HashMap::new())),
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    async fn used_bytes(&self) -> usize {
        self.slots.read().await.values().map(|s| s.entry.size).sum()
    }
}

#[async_trait]
impl CacheLayer for MemoryCacheLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = Utc::now();
        let mut slots = self.slots.write().await;
        match slots.get_mut(key) {
            Some(slot) if slot.entry.expires_at > now => {
                slot.last_access = self.clock.fetch_add(1, Ordering::SeqCst);
                Ok(Some(slot.entry.clone()))
            }
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        if entry.size > self.max_bytes {
            return Err(CacheError::EntryTooLarge {
                size: entry.size,
                budget: self.max_bytes,
            });
        }

        // Evict LRU entries until the new entry fits the budget.
        let incoming = entry.size;
        let mut slots = self.slots.write().await;
        slots.remove(&entry.key);
        let mut used: usize = slots.values().map(|s| s.entry.size).sum();
        while used + incoming > self.max_bytes {
            let Some(lru_key) = slots
                .iter()
                .min_by_key(|(_, s)| s.last_access)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(victim) = slots.remove(&lru_key) {
                used -= victim.entry.size;
                self.evictions.fetch_add(1, Ordering::SeqCst);
                debug!(layer = %self.name, key = %lru_key, "evicted under memory pressure");
            }
        }

        let last_access = self.tick();
        slots.insert(entry.key.clone(), Slot { entry, last_access });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.slots.write().await.remove(key).is_some())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let mut slots = self.slots.write().await;
        let doomed: Vec<String> = slots
            .iter()
            .filter(|(_, s)| s.entry.tags.iter().any(|t| t == tag))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            slots.remove(key);
        }
        Ok(doomed.len())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.slots.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CachePolicy;
    use serde_json::json;

    fn entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(key, json!({"k": key}), CachePolicy::relaxed(), vec![]).with_size(size)
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let layer = MemoryCacheLayer::new("l1", 1024);
        layer.put(entry("a", 10)).await.unwrap();
        assert!(layer.get("a").await.unwrap().is_some());
        assert!(layer.remove("a").await.unwrap());
        assert!(layer.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction_under_budget() {
        let layer = MemoryCacheLayer::new("l1", 100);
        layer.put(entry("a", 40)).await.unwrap();
        layer.put(entry("b", 40)).await.unwrap();
        // Touch "a" so "b" is the LRU victim.
        layer.get("a").await.unwrap();
        layer.put(entry("c", 40)).await.unwrap();

        assert!(layer.get("a").await.unwrap().is_some());
        assert!(layer.get("b").await.unwrap().is_none());
        assert!(layer.get("c").await.unwrap().is_some());
        assert_eq!(layer.eviction_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let layer = MemoryCacheLayer::new("l1", 10);
        let err = layer.put(entry("big", 100)).await.unwrap_err();
        assert!(matches!(err, CacheError::EntryTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_expired_entries_dropped_on_read() {
        let layer = MemoryCacheLayer::new("l1", 1024);
        let mut e = entry("a", 10);
        e.expires_at = Utc::now() - chrono::Duration::seconds(1);
        layer.put(e).await.unwrap();
        assert!(layer.get("a").await.unwrap().is_none());
        assert_eq!(layer.len().await, 0);
    }

    #[tokio::test]
    async fn test_tag_invalidation() {
        let layer = MemoryCacheLayer::new("l1", 1024);
        let mut tagged = entry("a", 10);
        tagged.tags = vec!["hexad:ent-1".to_string()];
        layer.put(tagged).await.unwrap();
        layer.put(entry("b", 10)).await.unwrap();

        let removed = layer.invalidate_tag("hexad:ent-1").await.unwrap();
        assert_eq!(removed, 1);
        assert!(layer.get("a").await.unwrap().is_none());
        assert!(layer.get("b").await.unwrap().is_some());
    }
}
