// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Drift Detection
//!
//! Monitors cross-modal consistency degradation and feeds the normalizer.
//! Drift is measured pairwise between the modalities of one hexad; scores
//! are recomputed lazily for queries carrying DRIFT predicates and eagerly
//! (sampled) for hexads in the working set.

use chrono::{DateTime, Utc};
use prometheus::{Counter, Gauge, Registry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use verisim_model::{Hexad, HexadId};

mod embedding;
mod score;

pub use embedding::{char_fingerprint, cosine_similarity, derive_embedding, EmbeddingPolicy};
pub use score::{consistency, drift_score, ConsistencyMetric, DriftMatrix, ModalityPair};

/// Drift detection errors
#[derive(Error, Debug)]
pub enum DriftError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Lock poisoned: internal concurrency error")]
    LockPoisoned,
}

/// Drift cause, as classified by the detector.
///
/// Integrity and Retraction are Critical and must be pushed; the classifier
/// never downgrades them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriftCause {
    /// Content hashes disagree where a derivation should match its authority.
    Integrity,
    /// A tombstoned or retracted value still visible in a derived modality.
    Retraction,
    /// A derivation lagging behind its authority.
    Staleness,
    /// Presentation-level disagreement.
    Cosmetic,
}

/// Advisory repair class handed to the normalizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriftClass {
    Low,
    High,
    Critical,
}

/// Classify a drift observation. Critical causes stay Critical regardless
/// of score; the rest grade on the score.
pub fn classify(cause: DriftCause, score: f64) -> DriftClass {
    match cause {
        DriftCause::Integrity | DriftCause::Retraction => DriftClass::Critical,
        DriftCause::Staleness => {
            if score > 0.6 {
                DriftClass::High
            } else {
                DriftClass::Low
            }
        }
        DriftCause::Cosmetic => DriftClass::Low,
    }
}

/// A detected drift event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub hexad_id: HexadId,
    pub pair: ModalityPair,
    pub score: f64,
    pub cause: DriftCause,
    pub class: DriftClass,
    pub detected_at: DateTime<Utc>,
    pub description: String,
}

impl DriftEvent {
    pub fn new(hexad_id: HexadId, pair: ModalityPair, score: f64, cause: DriftCause) -> Self {
        let class = classify(cause, score);
        Self {
            description: format!("{pair} drift {score:.3} on {hexad_id} ({cause:?})"),
            hexad_id,
            pair,
            score,
            cause,
            class,
            detected_at: Utc::now(),
        }
    }
}

/// Threshold policy: fixed, or adaptive on the moving average. The adaptive
/// form is the seam for the external learning advisor - proposed values are
/// applied atomically by swapping the policy at the next poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ThresholdPolicy {
    Fixed(f64),
    Adaptive { base: f64, sensitivity: f64 },
}

impl ThresholdPolicy {
    pub fn effective_threshold(&self, moving_average: f64) -> f64 {
        match self {
            ThresholdPolicy::Fixed(v) => *v,
            ThresholdPolicy::Adaptive { base, sensitivity } => base + (moving_average * sensitivity),
        }
    }
}

/// Threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftThresholds {
    /// Default repair threshold applied to every pair.
    pub repair_threshold: f64,
    /// Per-pair overrides.
    #[serde(default)]
    pub pair_overrides: HashMap<String, f64>,
    /// Optional adaptive policies per pair (overrides fixed values).
    #[serde(default)]
    pub adaptive_policies: HashMap<String, ThresholdPolicy>,
    /// Write frequency (writes/min) above which High drift is pushed.
    pub push_frequency_threshold: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            repair_threshold: 0.3,
            pair_overrides: HashMap::new(),
            adaptive_policies: HashMap::new(),
            push_frequency_threshold: 10.0,
        }
    }
}

impl DriftThresholds {
    pub fn effective_threshold(&self, pair: ModalityPair, moving_average: f64) -> f64 {
        let key = pair.to_string();
        if let Some(policy) = self.adaptive_policies.get(&key) {
            return policy.effective_threshold(moving_average);
        }
        self.pair_overrides
            .get(&key)
            .copied()
            .unwrap_or(self.repair_threshold)
    }
}

/// Rolling metrics for one modality pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftMetrics {
    pub current_score: f64,
    pub moving_average: f64,
    pub max_score: f64,
    pub measurement_count: u64,
    pub last_measured: DateTime<Utc>,
    /// Last 100 measurements.
    pub history: Vec<(DateTime<Utc>, f64)>,
}

impl Default for DriftMetrics {
    fn default() -> Self {
        Self {
            current_score: 0.0,
            moving_average: 0.0,
            max_score: 0.0,
            measurement_count: 0,
            last_measured: Utc::now(),
            history: Vec::new(),
        }
    }
}

impl DriftMetrics {
    pub fn record(&mut self, score: f64) {
        self.current_score = score;
        self.measurement_count += 1;
        self.last_measured = Utc::now();
        if score > self.max_score {
            self.max_score = score;
        }
        let alpha = 0.1;
        self.moving_average = alpha * score + (1.0 - alpha) * self.moving_average;
        self.history.push((Utc::now(), score));
        if self.history.len() > 100 {
            self.history.remove(0);
        }
    }

    /// Trend over the recent history (positive = drift increasing).
    pub fn trend(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let recent: Vec<_> = self.history.iter().rev().take(10).collect();
        let older: Vec<_> = self.history.iter().rev().skip(10).take(10).collect();
        if older.is_empty() {
            return 0.0;
        }
        let recent_avg: f64 = recent.iter().map(|(_, s)| s).sum::<f64>() / recent.len() as f64;
        let older_avg: f64 = older.iter().map(|(_, s)| s).sum::<f64>() / older.len() as f64;
        recent_avg - older_avg
    }
}

/// Drift detector: holds per-hexad pairwise matrices, rolling per-pair
/// metrics, and emits events when scores cross the configured threshold.
pub struct DriftDetector {
    thresholds: RwLock<DriftThresholds>,
    policy: EmbeddingPolicy,
    metrics: Arc<RwLock<HashMap<ModalityPair, DriftMetrics>>>,
    matrices: Arc<RwLock<HashMap<HexadId, DriftMatrix>>>,
    event_sender: Option<mpsc::Sender<DriftEvent>>,
    drift_score_gauge: Option<HashMap<ModalityPair, Gauge>>,
    drift_event_counter: Option<HashMap<ModalityPair, Counter>>,
}

impl DriftDetector {
    pub fn new(thresholds: DriftThresholds) -> Self {
        let mut metrics = HashMap::new();
        for pair in ModalityPair::all() {
            metrics.insert(pair, DriftMetrics::default());
        }
        Self {
            thresholds: RwLock::new(thresholds),
            policy: EmbeddingPolicy::default(),
            metrics: Arc::new(RwLock::new(metrics)),
            matrices: Arc::new(RwLock::new(HashMap::new())),
            event_sender: None,
            drift_score_gauge: None,
            drift_event_counter: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DriftThresholds::default())
    }

    /// Set event channel for drift notifications.
    pub fn with_event_channel(mut self, sender: mpsc::Sender<DriftEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Register Prometheus metrics for every pair.
    pub fn with_prometheus(mut self, registry: Registry) -> Result<Self, DriftError> {
        let mut gauges = HashMap::new();
        let mut counters = HashMap::new();
        for pair in ModalityPair::all() {
            let name = format!("{}_{}", pair.0, pair.1);
            let gauge = Gauge::new(
                format!("verisim_drift_score_{name}"),
                format!("Current drift score for {pair}"),
            )
            .map_err(|e| DriftError::InvalidThreshold(e.to_string()))?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(|e| DriftError::InvalidThreshold(e.to_string()))?;
            gauges.insert(pair, gauge);

            let counter = Counter::new(
                format!("verisim_drift_events_{name}"),
                format!("Number of drift events for {pair}"),
            )
            .map_err(|e| DriftError::InvalidThreshold(e.to_string()))?;
            registry
                .register(Box::new(counter.clone()))
                .map_err(|e| DriftError::InvalidThreshold(e.to_string()))?;
            counters.insert(pair, counter);
        }
        self.drift_score_gauge = Some(gauges);
        self.drift_event_counter = Some(counters);
        Ok(self)
    }

    /// Apply advisor-proposed thresholds atomically.
    pub fn apply_thresholds(&self, thresholds: DriftThresholds) -> Result<(), DriftError> {
        let mut current = self.thresholds.write().map_err(|_| DriftError::LockPoisoned)?;
        *current = thresholds;
        Ok(())
    }

    /// Recompute a hexad's full pairwise matrix and record every score.
    /// Returns the events for pairs exceeding their thresholds.
    pub async fn observe(
        &self,
        hexad: &Hexad,
        cause: DriftCause,
    ) -> Result<Vec<DriftEvent>, DriftError> {
        let matrix = DriftMatrix::compute(hexad, self.policy);
        let mut events = Vec::new();

        for (pair, score) in matrix.iter() {
            if let Some(event) = self
                .record(hexad.id.clone(), *pair, *score, cause)
                .await?
            {
                events.push(event);
            }
        }

        self.matrices
            .write()
            .map_err(|_| DriftError::LockPoisoned)?
            .insert(hexad.id.clone(), matrix);

        Ok(events)
    }

    /// Record one pair measurement; emits an event when the score exceeds
    /// the effective threshold.
    pub async fn record(
        &self,
        hexad_id: HexadId,
        pair: ModalityPair,
        score: f64,
        cause: DriftCause,
    ) -> Result<Option<DriftEvent>, DriftError> {
        let moving_avg = {
            let mut metrics = self.metrics.write().map_err(|_| DriftError::LockPoisoned)?;
            let m = metrics.entry(pair).or_default();
            m.record(score);
            m.moving_average
        };

        if let Some(ref gauges) = self.drift_score_gauge {
            if let Some(gauge) = gauges.get(&pair) {
                gauge.set(score);
            }
        }

        let threshold = {
            let thresholds = self.thresholds.read().map_err(|_| DriftError::LockPoisoned)?;
            thresholds.effective_threshold(pair, moving_avg)
        };

        if score <= threshold {
            return Ok(None);
        }

        debug!(%hexad_id, %pair, score, threshold, "drift threshold exceeded");
        let event = DriftEvent::new(hexad_id, pair, score, cause);

        if let Some(ref counters) = self.drift_event_counter {
            if let Some(counter) = counters.get(&pair) {
                counter.inc();
            }
        }
        if let Some(ref sender) = self.event_sender {
            sender
                .send(event.clone())
                .await
                .map_err(|e| DriftError::ChannelError(e.to_string()))?;
        }
        Ok(Some(event))
    }

    /// Cached matrix for a hexad, if it has been observed.
    pub fn matrix(&self, id: &HexadId) -> Result<Option<DriftMatrix>, DriftError> {
        let matrices = self.matrices.read().map_err(|_| DriftError::LockPoisoned)?;
        Ok(matrices.get(id).cloned())
    }

    pub fn get_metrics(&self, pair: ModalityPair) -> Result<Option<DriftMetrics>, DriftError> {
        let metrics = self.metrics.read().map_err(|_| DriftError::LockPoisoned)?;
        Ok(metrics.get(&pair).cloned())
    }

    pub fn all_metrics(&self) -> Result<HashMap<ModalityPair, DriftMetrics>, DriftError> {
        let metrics = self.metrics.read().map_err(|_| DriftError::LockPoisoned)?;
        Ok(metrics.clone())
    }

    /// Summarize the worst pair across the working set.
    pub fn health_check(&self) -> Result<DriftHealthStatus, DriftError> {
        let metrics = self.metrics.read().map_err(|_| DriftError::LockPoisoned)?;
        let mut worst_score = 0.0;
        let mut worst_pair = None;
        for (pair, m) in metrics.iter() {
            if m.current_score > worst_score {
                worst_score = m.current_score;
                worst_pair = Some(*pair);
            }
        }
        let status = if worst_score > 0.9 {
            HealthStatus::Critical
        } else if worst_score > 0.7 {
            HealthStatus::Degraded
        } else if worst_score > 0.5 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        Ok(DriftHealthStatus {
            status,
            worst_pair,
            worst_score,
            checked_at: Utc::now(),
        })
    }
}

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

/// Drift health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftHealthStatus {
    pub status: HealthStatus,
    pub worst_pair: Option<ModalityPair>,
    pub worst_score: f64,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use verisim_model::{HexadBuilder, Modality};

    #[tokio::test]
    async fn test_observe_emits_events_above_threshold() {
        let detector = DriftDetector::with_defaults();
        // Document and vector completely unrelated: near-maximal drift.
        let hexad = HexadBuilder::new("ent-1")
            .with_document("X", "unrelated body")
            .with_embedding(vec![1.0, 0.0, 0.0, 0.0])
            .build();

        let events = detector.observe(&hexad, DriftCause::Staleness).await.unwrap();
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.score > 0.3));
    }

    #[tokio::test]
    async fn test_critical_never_downgraded() {
        assert_eq!(classify(DriftCause::Integrity, 0.01), DriftClass::Critical);
        assert_eq!(classify(DriftCause::Retraction, 0.0), DriftClass::Critical);
        assert_eq!(classify(DriftCause::Cosmetic, 0.99), DriftClass::Low);
    }

    #[tokio::test]
    async fn test_event_channel_delivery() {
        let (tx, mut rx) = mpsc::channel(16);
        let detector = DriftDetector::with_defaults().with_event_channel(tx);
        detector
            .record(
                HexadId::new("ent-1"),
                ModalityPair::new(Modality::Document, Modality::Vector),
                0.9,
                DriftCause::Staleness,
            )
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.hexad_id.as_str(), "ent-1");
        assert_eq!(event.class, DriftClass::High);
    }

    #[tokio::test]
    async fn test_matrix_cached_after_observe() {
        let detector = DriftDetector::with_defaults();
        let hexad = HexadBuilder::new("ent-1").with_document("X", "t").build();
        detector.observe(&hexad, DriftCause::Cosmetic).await.unwrap();
        let matrix = detector.matrix(&HexadId::new("ent-1")).unwrap().unwrap();
        assert!(!matrix.is_empty());
    }

    #[tokio::test]
    async fn test_adaptive_threshold_applied_atomically() {
        let detector = DriftDetector::with_defaults();
        let pair = ModalityPair::new(Modality::Document, Modality::Vector);

        let mut thresholds = DriftThresholds::default();
        thresholds
            .adaptive_policies
            .insert(pair.to_string(), ThresholdPolicy::Fixed(0.95));
        detector.apply_thresholds(thresholds).unwrap();

        // 0.9 is under the raised threshold: no event.
        let event = detector
            .record(HexadId::new("e"), pair, 0.9, DriftCause::Staleness)
            .await
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_health_check_healthy_initially() {
        let detector = DriftDetector::with_defaults();
        let status = detector.health_check().unwrap();
        assert_eq!(status.status, HealthStatus::Healthy);
    }
}
