// SPDX-License-Identifier: PMPL-1.0-or-later
//! The modality store capability set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use verisim_model::{HexadId, Modality, ModalityPayload};

use crate::{StoreError, StorePredicate};

/// One row from a store scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRow {
    pub id: HexadId,
    pub modality: Modality,
    pub payload: ModalityPayload,
    pub version: u64,
}

/// Uniform capability set of a backing modality store.
///
/// Stores are strongly consistent locally and may fail independently; the
/// engine wraps each store in a circuit breaker and treats it as unavailable
/// after consecutive timeouts. Scan results are ordered by hexad id so that
/// downstream processing is deterministic.
#[async_trait]
pub trait ModalityStore: Send + Sync {
    /// Stable store identifier.
    fn store_id(&self) -> &str;

    /// Modalities this store serves.
    fn advertise(&self) -> Vec<Modality>;

    /// Write a payload at the given version.
    ///
    /// Fails with [`StoreError::Conflict`] when `version` does not advance
    /// the stored version, [`StoreError::NotLeader`] when a replicated store
    /// cannot accept writes here.
    async fn put(
        &self,
        id: &HexadId,
        payload: ModalityPayload,
        version: u64,
    ) -> Result<(), StoreError>;

    /// Read a payload and its version.
    async fn get(
        &self,
        id: &HexadId,
        modality: Modality,
    ) -> Result<Option<(ModalityPayload, u64)>, StoreError>;

    /// Scan hexads matching the pushdown predicate, ordered by hexad id.
    async fn scan(
        &self,
        predicate: &StorePredicate,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ScanRow>, StoreError>;

    /// Remove all payloads for a hexad.
    async fn delete(&self, id: &HexadId) -> Result<(), StoreError>;

    /// Content hash of one modality of a hexad.
    async fn content_hash(
        &self,
        id: &HexadId,
        modality: Modality,
    ) -> Result<Option<String>, StoreError>;
}
