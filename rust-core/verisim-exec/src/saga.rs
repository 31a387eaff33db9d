// SPDX-License-Identifier: PMPL-1.0-or-later
//! Mutation sagas.
//!
//! A mutation spanning several stores executes as a saga: every forward
//! step records a compensator, and any forward failure runs the recorded
//! compensators in reverse order. The saga outcome - commit or rollback -
//! is appended to the temporal audit log with the steps it covered.

use std::sync::Arc;
use tracing::{info, warn};

use verisim_model::{HexadId, Modality, ModalityPayload};
use verisim_store::{AuditKind, ModalityStore, TemporalLog};

use crate::EngineError;

/// A recorded compensator for one completed forward step.
pub enum Compensator {
    /// Undo a fresh write by deleting the hexad from the store.
    Delete {
        store: Arc<dyn ModalityStore>,
        id: HexadId,
    },
    /// Undo an overwrite by restoring the previous payload at a bumped
    /// version (versions only move forward).
    Restore {
        store: Arc<dyn ModalityStore>,
        id: HexadId,
        payload: ModalityPayload,
        version: u64,
    },
}

/// Outcome of a finished saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    Committed,
    RolledBack,
}

/// A saga in flight.
pub struct Saga {
    pub saga_id: String,
    hexad_id: Option<HexadId>,
    steps: Vec<(String, Modality)>,
    compensators: Vec<Compensator>,
}

impl Saga {
    pub fn begin(hexad_id: Option<HexadId>) -> Self {
        Self {
            saga_id: uuid::Uuid::new_v4().to_string(),
            hexad_id,
            steps: Vec::new(),
            compensators: Vec::new(),
        }
    }

    /// Record a completed forward step with its compensator.
    pub fn record(&mut self, description: impl Into<String>, modality: Modality, compensator: Compensator) {
        self.steps.push((description.into(), modality));
        self.compensators.push(compensator);
    }

    /// Record a step with nothing to compensate (a failed forward write).
    /// The step still appears in the saga's audit trail.
    pub fn note(&mut self, description: impl Into<String>, modality: Modality) {
        self.steps.push((description.into(), modality));
    }

    pub fn steps(&self) -> &[(String, Modality)] {
        &self.steps
    }

    /// Commit: audit and drop the compensators.
    pub async fn commit(self, log: &dyn TemporalLog) -> Result<SagaOutcome, EngineError> {
        let modalities: Vec<Modality> = self.steps.iter().map(|(_, m)| *m).collect();
        log.append(
            AuditKind::SagaCommit,
            self.hexad_id.clone(),
            modalities,
            format!("saga {} committed: {}", self.saga_id, self.describe()),
        )
        .await?;
        info!(saga = %self.saga_id, "saga committed");
        Ok(SagaOutcome::Committed)
    }

    /// Roll back: run compensators in reverse order, then audit.
    pub async fn rollback(self, log: &dyn TemporalLog) -> Result<SagaOutcome, EngineError> {
        let description = self.describe();
        let modalities: Vec<Modality> = self.steps.iter().map(|(_, m)| *m).collect();

        for compensator in self.compensators.into_iter().rev() {
            match compensator {
                Compensator::Delete { store, id } => {
                    if let Err(err) = store.delete(&id).await {
                        warn!(saga = %self.saga_id, %err, "compensating delete failed");
                    }
                }
                Compensator::Restore { store, id, payload, version } => {
                    if let Err(err) = store.put(&id, payload, version).await {
                        warn!(saga = %self.saga_id, %err, "compensating restore failed");
                    }
                }
            }
        }

        log.append(
            AuditKind::SagaRollback,
            self.hexad_id.clone(),
            modalities,
            format!("saga_rollback {}: {}", self.saga_id, description),
        )
        .await?;
        warn!(saga = %self.saga_id, "saga rolled back");
        Ok(SagaOutcome::RolledBack)
    }

    fn describe(&self) -> String {
        self.steps
            .iter()
            .map(|(desc, _)| desc.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use verisim_store::{InMemoryModalityStore, InMemoryTemporalLog};

    fn doc(title: &str) -> ModalityPayload {
        ModalityPayload::Document {
            title: title.to_string(),
            body: String::new(),
            fields: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_rollback_deletes_written_steps_in_reverse() {
        let store = Arc::new(InMemoryModalityStore::full("s1"));
        let log = InMemoryTemporalLog::new();
        let id = HexadId::new("ent-1");

        store.put(&id, doc("written"), 1).await.unwrap();

        let mut saga = Saga::begin(Some(id.clone()));
        saga.record(
            "write document",
            Modality::Document,
            Compensator::Delete {
                store: store.clone(),
                id: id.clone(),
            },
        );

        saga.rollback(&log).await.unwrap();
        assert!(store.get(&id, Modality::Document).await.unwrap().is_none());

        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, AuditKind::SagaRollback);
        assert!(entries[0].detail.contains("saga_rollback"));
        assert!(entries[0].detail.contains("write document"));
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_payload() {
        let store = Arc::new(InMemoryModalityStore::full("s1"));
        let log = InMemoryTemporalLog::new();
        let id = HexadId::new("ent-1");

        store.put(&id, doc("old"), 1).await.unwrap();
        store.put(&id, doc("new"), 2).await.unwrap();

        let mut saga = Saga::begin(Some(id.clone()));
        saga.record(
            "overwrite document",
            Modality::Document,
            Compensator::Restore {
                store: store.clone(),
                id: id.clone(),
                payload: doc("old"),
                version: 3,
            },
        );
        saga.rollback(&log).await.unwrap();

        let (payload, version) = store.get(&id, Modality::Document).await.unwrap().unwrap();
        assert_eq!(payload.field("title"), verisim_model::Value::Str("old".to_string()));
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn test_commit_audits_without_compensating() {
        let store = Arc::new(InMemoryModalityStore::full("s1"));
        let log = InMemoryTemporalLog::new();
        let id = HexadId::new("ent-1");
        store.put(&id, doc("kept"), 1).await.unwrap();

        let mut saga = Saga::begin(Some(id.clone()));
        saga.record(
            "write document",
            Modality::Document,
            Compensator::Delete {
                store: store.clone(),
                id: id.clone(),
            },
        );
        saga.commit(&log).await.unwrap();

        assert!(store.get(&id, Modality::Document).await.unwrap().is_some());
        let entries = log.entries().await.unwrap();
        assert_eq!(entries[0].kind, AuditKind::SagaCommit);
    }
}
