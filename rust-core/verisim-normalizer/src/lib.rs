// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Normalizer
//!
//! Self-normalization engine that maintains cross-modal consistency. When
//! the drift detector reports a pair above threshold, the normalizer picks
//! a strategy - push, pull, hybrid, or quarantine - and rewrites the
//! drifted modality from its authoritative counterpart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, instrument, warn};

use verisim_drift::{DriftCause, DriftClass, DriftEvent, ModalityPair};
use verisim_model::{FieldClassPolicy, Hexad, HexadId, Modality};

mod derive;

pub use derive::{derivable, derive};

/// Normalizer errors
#[derive(Error, Debug, Clone)]
pub enum NormalizerError {
    #[error("Normalization failed for {entity_id}: {message}")]
    NormalizationFailed { entity_id: String, message: String },

    #[error("No derivation from {authority} to {target}")]
    NotDerivable { authority: Modality, target: Modality },

    #[error("Hexad {0} is quarantined")]
    Quarantined(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl NormalizerError {
    pub fn code(&self) -> &'static str {
        match self {
            NormalizerError::NormalizationFailed { .. } => "store/normalization-failed",
            NormalizerError::NotDerivable { .. } => "store/not-derivable",
            NormalizerError::Quarantined(_) => "store/quarantined",
            NormalizerError::ChannelError(_) => "internal/channel",
        }
    }

    pub fn recoverable(&self) -> bool {
        matches!(self, NormalizerError::ChannelError(_))
    }
}

/// Repair strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStrategy {
    /// Synchronously rewrite the drifted modality from the authority.
    Push,
    /// Substitute the derived value on next read; the write is scheduled.
    Pull,
    /// Push for Critical/High, pull for Low.
    Hybrid,
    /// Mark the hexad unreadable by default queries until released.
    Quarantine,
}

/// A specific change made during normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationChange {
    pub modality: Modality,
    pub old_hash: Option<String>,
    pub new_hash: String,
    pub reason: String,
}

/// Result of one repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub entity_id: HexadId,
    pub pair: ModalityPair,
    pub strategy: RepairStrategy,
    /// False when the target already matched its derivation.
    pub changed: bool,
    pub changes: Vec<NormalizationChange>,
    pub completed_at: DateTime<Utc>,
}

/// Configuration for the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Whether drift events trigger repair automatically.
    pub auto_normalize: bool,
    /// Minimum drift score to act on.
    pub min_score: f64,
    /// Writes/min above which High drift pushes instead of pulling.
    pub push_frequency_threshold: f64,
    /// Backoff after failed normalization (seconds).
    pub failure_backoff_secs: u64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            auto_normalize: true,
            min_score: 0.3,
            push_frequency_threshold: 10.0,
            failure_backoff_secs: 60,
        }
    }
}

/// Status of the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NormalizerStatus {
    pub pending_pulls: usize,
    pub quarantined: usize,
    pub completed_count: u64,
    pub failure_count: u64,
    pub last_normalization: Option<DateTime<Utc>>,
}

/// The normalization engine.
pub struct Normalizer {
    config: NormalizerConfig,
    authority: FieldClassPolicy,
    /// Hexads whose next read must substitute a derived value.
    pending_pulls: Arc<RwLock<HashSet<HexadId>>>,
    /// Hexads unreadable by default queries until operator release.
    quarantined: Arc<RwLock<HashSet<HexadId>>>,
    status: Arc<RwLock<NormalizerStatus>>,
    result_sender: Option<mpsc::Sender<RepairOutcome>>,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig, authority: FieldClassPolicy) -> Self {
        Self {
            config,
            authority,
            pending_pulls: Arc::new(RwLock::new(HashSet::new())),
            quarantined: Arc::new(RwLock::new(HashSet::new())),
            status: Arc::new(RwLock::new(NormalizerStatus::default())),
            result_sender: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(NormalizerConfig::default(), FieldClassPolicy::default())
    }

    /// Set result notification channel.
    pub fn with_result_channel(mut self, sender: mpsc::Sender<RepairOutcome>) -> Self {
        self.result_sender = Some(sender);
        self
    }

    /// Strategy for a classified drift event. Critical causes with integrity
    /// violations quarantine; other Critical/High push (High only above the
    /// write-frequency threshold); Low pulls on query.
    pub fn plan_strategy(
        &self,
        class: DriftClass,
        cause: DriftCause,
        write_frequency: f64,
    ) -> RepairStrategy {
        match (class, cause) {
            (DriftClass::Critical, DriftCause::Integrity) => RepairStrategy::Quarantine,
            (DriftClass::Critical, _) => RepairStrategy::Push,
            (DriftClass::High, _) => {
                if write_frequency > self.config.push_frequency_threshold {
                    RepairStrategy::Push
                } else {
                    RepairStrategy::Pull
                }
            }
            (DriftClass::Low, _) => RepairStrategy::Pull,
        }
    }

    /// Handle a drift event against the hexad's current state.
    #[instrument(skip(self, hexad, event), fields(id = %hexad.id, pair = %event.pair))]
    pub async fn handle_event(
        &self,
        hexad: &mut Hexad,
        event: &DriftEvent,
        write_frequency: f64,
    ) -> Result<Option<RepairOutcome>, NormalizerError> {
        if !self.config.auto_normalize || event.score < self.config.min_score {
            return Ok(None);
        }

        let strategy = self.plan_strategy(event.class, event.cause, write_frequency);
        match strategy {
            RepairStrategy::Quarantine => {
                warn!(id = %hexad.id, "integrity violation - quarantining");
                self.quarantined.write().await.insert(hexad.id.clone());
                let outcome = RepairOutcome {
                    entity_id: hexad.id.clone(),
                    pair: event.pair,
                    strategy,
                    changed: false,
                    changes: Vec::new(),
                    completed_at: Utc::now(),
                };
                self.finish(outcome.clone(), true).await?;
                Ok(Some(outcome))
            }
            RepairStrategy::Pull => {
                self.pending_pulls.write().await.insert(hexad.id.clone());
                let outcome = RepairOutcome {
                    entity_id: hexad.id.clone(),
                    pair: event.pair,
                    strategy,
                    changed: false,
                    changes: Vec::new(),
                    completed_at: Utc::now(),
                };
                self.finish(outcome.clone(), true).await?;
                Ok(Some(outcome))
            }
            RepairStrategy::Push | RepairStrategy::Hybrid => {
                let outcome = self.repair(hexad, event.pair.0, event.pair.1).await?;
                Ok(Some(outcome))
            }
        }
    }

    /// Repair one modality pair: derive the non-authoritative side from the
    /// authority and write it when it differs.
    ///
    /// Idempotent: repairing an already-repaired hexad is a no-op, and the
    /// repaired modality's content hash equals the derivation's hash.
    pub async fn repair(
        &self,
        hexad: &mut Hexad,
        a: Modality,
        b: Modality,
    ) -> Result<RepairOutcome, NormalizerError> {
        let authority = self.authority.repair_authority(a, b);
        let target = if authority == a { b } else { a };

        let source = hexad.payload(authority).cloned().ok_or_else(|| {
            NormalizerError::NormalizationFailed {
                entity_id: hexad.id.to_string(),
                message: format!("authoritative modality {authority} is absent"),
            }
        })?;

        let derived = derive(&source, target).ok_or(NormalizerError::NotDerivable {
            authority,
            target,
        })?;

        let old_hash = hexad.content_hash(target).map(String::from);
        let new_hash = derived.content_hash();
        let changed = old_hash.as_deref() != Some(new_hash.as_str());

        let mut changes = Vec::new();
        if changed {
            hexad.put(derived);
            changes.push(NormalizationChange {
                modality: target,
                old_hash,
                new_hash,
                reason: format!("derived from authoritative {authority}"),
            });
            info!(id = %hexad.id, %target, %authority, "repaired");
        }

        let outcome = RepairOutcome {
            entity_id: hexad.id.clone(),
            pair: ModalityPair::new(a, b),
            strategy: RepairStrategy::Push,
            changed,
            changes,
            completed_at: Utc::now(),
        };
        self.finish(outcome.clone(), true).await?;
        Ok(outcome)
    }

    /// Pull resolution: called on read. When the hexad has a pending pull,
    /// repair every drifted pair involving its authority and clear the flag.
    pub async fn resolve_on_read(
        &self,
        hexad: &mut Hexad,
    ) -> Result<Option<RepairOutcome>, NormalizerError> {
        let pending = self.pending_pulls.write().await.remove(&hexad.id);
        if !pending {
            return Ok(None);
        }
        // Pull repairs the canonical document/vector pair first; other
        // drifted pairs follow from subsequent events.
        let outcome = self
            .repair(hexad, Modality::Document, Modality::Vector)
            .await?;
        Ok(Some(RepairOutcome {
            strategy: RepairStrategy::Pull,
            ..outcome
        }))
    }

    /// Whether default queries must skip this hexad.
    pub async fn is_quarantined(&self, id: &HexadId) -> bool {
        self.quarantined.read().await.contains(id)
    }

    /// Operator intervention: release a quarantined hexad.
    pub async fn release(&self, id: &HexadId) -> bool {
        self.quarantined.write().await.remove(id)
    }

    pub async fn has_pending_pull(&self, id: &HexadId) -> bool {
        self.pending_pulls.read().await.contains(id)
    }

    pub async fn status(&self) -> NormalizerStatus {
        let mut status = self.status.read().await.clone();
        status.pending_pulls = self.pending_pulls.read().await.len();
        status.quarantined = self.quarantined.read().await.len();
        status
    }

    async fn finish(&self, outcome: RepairOutcome, success: bool) -> Result<(), NormalizerError> {
        {
            let mut status = self.status.write().await;
            if success {
                status.completed_count += 1;
                status.last_normalization = Some(Utc::now());
            } else {
                status.failure_count += 1;
            }
        }
        if let Some(ref sender) = self.result_sender {
            sender
                .send(outcome)
                .await
                .map_err(|e| NormalizerError::ChannelError(e.to_string()))?;
        }
        Ok(())
    }
}
