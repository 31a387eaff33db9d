// SPDX-License-Identifier: PMPL-1.0-or-later
//! Temporal audit log.
//!
//! Cross-modal write order, tombstones, repairs, and saga outcomes are all
//! recorded here. The log is the deferred-deletion ledger: physical removal
//! of a tombstoned hexad happens at the temporal store's discretion, never
//! at delete time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use verisim_model::{HexadId, Modality};

use crate::StoreError;

/// What kind of event an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Insert,
    Update,
    Repair,
    Tombstone,
    SagaCommit,
    SagaRollback,
}

/// One audit entry. Sequence numbers are assigned by the log and strictly
/// increase, giving cross-modal writes their total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hexad_id: Option<HexadId>,
    pub modalities: Vec<Modality>,
    /// Free-form detail: saga id, repaired pair, compensated steps.
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit log interface, implemented by the temporal store.
#[async_trait]
pub trait TemporalLog: Send + Sync {
    /// Append an entry, returning its assigned sequence number.
    async fn append(
        &self,
        kind: AuditKind,
        hexad_id: Option<HexadId>,
        modalities: Vec<Modality>,
        detail: String,
    ) -> Result<u64, StoreError>;

    /// Entries touching one hexad, in sequence order.
    async fn entries_for(&self, id: &HexadId) -> Result<Vec<AuditEntry>, StoreError>;

    /// All entries in sequence order.
    async fn entries(&self) -> Result<Vec<AuditEntry>, StoreError>;
}

/// In-memory audit log for tests and standalone deployments.
#[derive(Clone, Default)]
pub struct InMemoryTemporalLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryTemporalLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemporalLog for InMemoryTemporalLog {
    async fn append(
        &self,
        kind: AuditKind,
        hexad_id: Option<HexadId>,
        modalities: Vec<Modality>,
        detail: String,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let sequence = entries.len() as u64 + 1;
        entries.push(AuditEntry {
            sequence,
            kind,
            hexad_id,
            modalities,
            detail,
            timestamp: Utc::now(),
        });
        Ok(sequence)
    }

    async fn entries_for(&self, id: &HexadId) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.hexad_id.as_ref() == Some(id))
            .cloned()
            .collect())
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.entries.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let log = InMemoryTemporalLog::new();
        let a = log
            .append(AuditKind::Insert, Some(HexadId::new("e1")), vec![Modality::Document], String::new())
            .await
            .unwrap();
        let b = log
            .append(AuditKind::Update, Some(HexadId::new("e1")), vec![Modality::Vector], String::new())
            .await
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_entries_for_filters_by_hexad() {
        let log = InMemoryTemporalLog::new();
        log.append(AuditKind::Insert, Some(HexadId::new("e1")), vec![], String::new())
            .await
            .unwrap();
        log.append(AuditKind::Insert, Some(HexadId::new("e2")), vec![], String::new())
            .await
            .unwrap();
        log.append(AuditKind::SagaRollback, None, vec![], "saga-1".to_string())
            .await
            .unwrap();

        let e1 = log.entries_for(&HexadId::new("e1")).await.unwrap();
        assert_eq!(e1.len(), 1);
        assert_eq!(log.entries().await.unwrap().len(), 3);
    }
}
