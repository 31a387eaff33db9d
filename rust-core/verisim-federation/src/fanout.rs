// SPDX-License-Identifier: PMPL-1.0-or-later
//! Quorum fan-out.
//!
//! Resolves a `FEDERATION <glob>` source to peers, issues the query in
//! parallel under a deadline, and combines results per the drift policy:
//! STRICT fails on version conflicts, REPAIR surfaces candidates for the
//! normalizer, TOLERATE annotates, LATEST keeps the highest version. Peers
//! are shielded by circuit breakers, and a deviation heuristic flags
//! suspected Byzantine responders.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use verisim_model::{HexadId, Modality};
use verisim_store::{CircuitBreaker, ScanRow, StorePredicate};

use crate::peer::{PeerRegistry, PeerStore};
use crate::{DriftPolicy, FederationConfig, FederationError, MetadataCommand};

/// A query shipped to peers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FederatedQuery {
    pub pattern: String,
    pub required_modalities: Vec<Modality>,
    pub predicate: StorePredicate,
    pub limit: usize,
    pub policy: DriftPolicy,
}

/// How a peer is queried. The HTTP transport lives outside the core; tests
/// and embedded deployments answer from local stores.
#[async_trait]
pub trait PeerQueryClient: Send + Sync {
    async fn query(
        &self,
        peer: &PeerStore,
        query: &FederatedQuery,
    ) -> Result<Vec<ScanRow>, FederationError>;
}

/// One combined result row, annotated with provenance.
#[derive(Debug, Clone)]
pub struct AnnotatedRow {
    pub row: ScanRow,
    pub source_store: String,
    /// True when peers disagreed about this hexad.
    pub drifted: bool,
}

/// Result of a fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanOutResult {
    pub rows: Vec<AnnotatedRow>,
    pub stores_queried: Vec<String>,
    pub stores_failed: Vec<String>,
    /// Hexads the REPAIR policy hands to the normalizer.
    pub repair_candidates: Vec<HexadId>,
    /// Peers flagged by the deviation heuristic.
    pub byzantine_suspects: Vec<String>,
}

/// Coordinates fan-out across the peer registry.
pub struct FederationCoordinator {
    config: FederationConfig,
    client: Arc<dyn PeerQueryClient>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl FederationCoordinator {
    pub fn new(config: FederationConfig, client: Arc<dyn PeerQueryClient>) -> Self {
        Self {
            config,
            client,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn breaker_for(&self, store_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map lock poisoned");
        breakers
            .entry(store_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::with_defaults(store_id)))
            .clone()
    }

    /// Fan a query out over the registry and combine the responses.
    #[instrument(skip(self, registry, query), fields(pattern = %query.pattern))]
    pub async fn fan_out(
        &self,
        registry: &PeerRegistry,
        query: &FederatedQuery,
    ) -> Result<FanOutResult, FederationError> {
        let peers = registry.resolve(&query.pattern, &query.required_modalities, self.config.min_trust);
        if peers.is_empty() {
            return Ok(FanOutResult::default());
        }

        // Issue concurrently under the per-peer deadline; breakers gate
        // admission and absorb the outcome.
        let mut admitted = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        for peer in peers {
            let breaker = self.breaker_for(&peer.store_id);
            if breaker.allow() {
                admitted.push((peer, breaker));
            } else {
                warn!(store_id = %peer.store_id, "skipped: circuit open");
                failed.push(peer.store_id.clone());
            }
        }

        let total = admitted.len() + failed.len();
        let calls = admitted.iter().map(|(peer, breaker)| {
            let client = self.client.clone();
            let breaker = breaker.clone();
            let deadline = self.config.fan_out_timeout;
            async move {
                let outcome = timeout(deadline, client.query(peer, query)).await;
                match outcome {
                    Ok(Ok(rows)) => {
                        breaker.record_success();
                        (peer.store_id.clone(), peer.trust, Ok(rows))
                    }
                    Ok(Err(err)) => {
                        breaker.record_failure();
                        (peer.store_id.clone(), peer.trust, Err(err))
                    }
                    Err(_) => {
                        breaker.record_failure();
                        (
                            peer.store_id.clone(),
                            peer.trust,
                            Err(FederationError::Unreachable(peer.store_id.clone())),
                        )
                    }
                }
            }
        });
        let responses = join_all(calls).await;

        let mut per_peer: Vec<(String, f64, Vec<ScanRow>)> = Vec::new();
        let mut queried = Vec::new();
        for (store_id, trust, outcome) in responses {
            match outcome {
                Ok(rows) => {
                    queried.push(store_id.clone());
                    per_peer.push((store_id, trust, rows));
                }
                Err(err) => {
                    warn!(%store_id, %err, "peer failed");
                    failed.push(store_id);
                }
            }
        }

        // Quorum rule: partial results are acceptable only under TOLERATE.
        let quorum = total / 2 + 1;
        if !failed.is_empty() {
            let acceptable = query.policy == DriftPolicy::Tolerate && queried.len() >= quorum;
            if !acceptable {
                return Err(FederationError::PartialResults {
                    succeeded: queried.len(),
                    queried: total,
                });
            }
        }

        // Byzantine heuristic on response sizes.
        let max_rows = per_peer.iter().map(|(_, _, r)| r.len()).max().unwrap_or(0);
        let observations: Vec<(String, f64, f64)> = per_peer
            .iter()
            .map(|(id, trust, rows)| {
                let score = if max_rows > 0 {
                    rows.len() as f64 / max_rows as f64
                } else {
                    0.0
                };
                (id.clone(), score, *trust)
            })
            .collect();
        let byzantine_suspects = flag_byzantine(&observations);
        for suspect in &byzantine_suspects {
            warn!(store_id = %suspect, "byzantine deviation flagged");
        }

        let (rows, repair_candidates) = combine(per_peer, query.policy)?;

        info!(
            rows = rows.len(),
            queried = queried.len(),
            failed = failed.len(),
            "fan-out combined"
        );
        Ok(FanOutResult {
            rows,
            stores_queried: queried,
            stores_failed: failed,
            repair_candidates,
            byzantine_suspects,
        })
    }

    /// Build the UnregisterPeer proposal for a flagged peer. Submission is
    /// operator-gated; the coordinator only prepares the command.
    pub fn unregister_proposal(&self, store_id: &str) -> MetadataCommand {
        MetadataCommand::UnregisterPeer {
            store_id: store_id.to_string(),
        }
    }
}

/// Combine per-peer responses under the drift policy. Returns annotated
/// rows (deduplicated by hexad id and modality as the policy dictates) and
/// the repair candidates for REPAIR mode.
fn combine(
    per_peer: Vec<(String, f64, Vec<ScanRow>)>,
    policy: DriftPolicy,
) -> Result<(Vec<AnnotatedRow>, Vec<HexadId>), FederationError> {
    // (hexad, modality) -> [(store, row)]
    let mut grouped: BTreeMap<(HexadId, Modality), Vec<(String, ScanRow)>> = BTreeMap::new();
    for (store_id, _, rows) in per_peer {
        for row in rows {
            grouped
                .entry((row.id.clone(), row.modality))
                .or_default()
                .push((store_id.clone(), row));
        }
    }

    let mut out = Vec::new();
    let mut repair = Vec::new();

    for ((id, _modality), versions) in grouped {
        let distinct: std::collections::BTreeSet<u64> =
            versions.iter().map(|(_, r)| r.version).collect();
        let conflicted = distinct.len() > 1;

        match policy {
            DriftPolicy::Strict if conflicted => {
                return Err(FederationError::ConflictingVersions(id.to_string()));
            }
            DriftPolicy::Strict => {
                let (store, row) = versions.into_iter().next().expect("non-empty group");
                out.push(AnnotatedRow {
                    row,
                    source_store: store,
                    drifted: false,
                });
            }
            DriftPolicy::Tolerate => {
                for (store, row) in versions {
                    out.push(AnnotatedRow {
                        row,
                        source_store: store,
                        drifted: conflicted,
                    });
                }
            }
            DriftPolicy::Repair => {
                if conflicted && !repair.contains(&id) {
                    repair.push(id.clone());
                }
                // Serve the freshest copy while repair is scheduled.
                let (store, row) = versions
                    .into_iter()
                    .max_by_key(|(_, r)| r.version)
                    .expect("non-empty group");
                out.push(AnnotatedRow {
                    row,
                    source_store: store,
                    drifted: conflicted,
                });
            }
            DriftPolicy::Latest => {
                let (store, row) = versions
                    .into_iter()
                    .max_by_key(|(_, r)| r.version)
                    .expect("non-empty group");
                out.push(AnnotatedRow {
                    row,
                    source_store: store,
                    drifted: false,
                });
            }
        }
    }

    Ok((out, repair))
}

/// Flag peers whose response score deviates more than 0.3 from the
/// trust-weighted median. Observations are `(store_id, score, trust)`.
pub fn flag_byzantine(observations: &[(String, f64, f64)]) -> Vec<String> {
    if observations.len() < 3 {
        return Vec::new(); // no meaningful median
    }
    let mut sorted: Vec<&(String, f64, f64)> = observations.iter().collect();
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let total_trust: f64 = sorted.iter().map(|(_, _, t)| t).sum();
    let mut acc = 0.0;
    let mut median = sorted.last().map(|(_, s, _)| *s).unwrap_or(0.0);
    for (_, score, trust) in &sorted {
        acc += trust;
        if acc >= total_trust / 2.0 {
            median = *score;
            break;
        }
    }

    observations
        .iter()
        .filter(|(_, score, _)| (score - median).abs() > 0.3)
        .map(|(id, _, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use verisim_model::ModalityPayload;

    struct StaticClient {
        /// store_id -> rows (None = unreachable).
        answers: HashMap<String, Option<Vec<ScanRow>>>,
    }

    #[async_trait]
    impl PeerQueryClient for StaticClient {
        async fn query(
            &self,
            peer: &PeerStore,
            _query: &FederatedQuery,
        ) -> Result<Vec<ScanRow>, FederationError> {
            match self.answers.get(&peer.store_id) {
                Some(Some(rows)) => Ok(rows.clone()),
                _ => Err(FederationError::Unreachable(peer.store_id.clone())),
            }
        }
    }

    fn row(id: &str, version: u64) -> ScanRow {
        ScanRow {
            id: HexadId::new(id),
            modality: Modality::Document,
            payload: ModalityPayload::Document {
                title: format!("{id}-v{version}"),
                body: String::new(),
                fields: Map::new(),
            },
            version,
        }
    }

    fn registry(ids: &[&str]) -> PeerRegistry {
        let mut registry = PeerRegistry::new();
        for id in ids {
            registry.insert(PeerStore::new(*id, format!("http://{id}"), vec![Modality::Document]));
        }
        registry
    }

    fn query(policy: DriftPolicy) -> FederatedQuery {
        FederatedQuery {
            pattern: "*".to_string(),
            required_modalities: vec![Modality::Document],
            predicate: StorePredicate::True,
            limit: 100,
            policy,
        }
    }

    fn coordinator(answers: HashMap<String, Option<Vec<ScanRow>>>) -> FederationCoordinator {
        FederationCoordinator::new(
            FederationConfig::default(),
            Arc::new(StaticClient { answers }),
        )
    }

    #[tokio::test]
    async fn test_dedup_and_latest() {
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), Some(vec![row("ent-1", 1)]));
        answers.insert("p2".to_string(), Some(vec![row("ent-1", 3)]));
        let coord = coordinator(answers);

        let result = coord
            .fan_out(&registry(&["p1", "p2"]), &query(DriftPolicy::Latest))
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].row.version, 3);
        assert_eq!(result.rows[0].source_store, "p2");
    }

    #[tokio::test]
    async fn test_strict_rejects_conflicts() {
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), Some(vec![row("ent-1", 1)]));
        answers.insert("p2".to_string(), Some(vec![row("ent-1", 2)]));
        let coord = coordinator(answers);

        let err = coord
            .fan_out(&registry(&["p1", "p2"]), &query(DriftPolicy::Strict))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::ConflictingVersions(_)));
    }

    #[tokio::test]
    async fn test_tolerate_annotates_all_versions() {
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), Some(vec![row("ent-1", 1)]));
        answers.insert("p2".to_string(), Some(vec![row("ent-1", 2), row("ent-2", 1)]));
        let coord = coordinator(answers);

        let result = coord
            .fan_out(&registry(&["p1", "p2"]), &query(DriftPolicy::Tolerate))
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 3);
        let ent1_rows: Vec<_> = result.rows.iter().filter(|r| r.row.id.as_str() == "ent-1").collect();
        assert!(ent1_rows.iter().all(|r| r.drifted));
        let ent2 = result.rows.iter().find(|r| r.row.id.as_str() == "ent-2").unwrap();
        assert!(!ent2.drifted);
    }

    #[tokio::test]
    async fn test_repair_collects_candidates() {
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), Some(vec![row("ent-1", 1)]));
        answers.insert("p2".to_string(), Some(vec![row("ent-1", 2)]));
        let coord = coordinator(answers);

        let result = coord
            .fan_out(&registry(&["p1", "p2"]), &query(DriftPolicy::Repair))
            .await
            .unwrap();
        assert_eq!(result.repair_candidates, vec![HexadId::new("ent-1")]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].row.version, 2);
    }

    #[tokio::test]
    async fn test_partial_results_tolerate_quorum() {
        let mut answers = HashMap::new();
        answers.insert("p1".to_string(), Some(vec![row("ent-1", 1)]));
        answers.insert("p2".to_string(), Some(vec![row("ent-2", 1)]));
        answers.insert("p3".to_string(), None); // unreachable
        let coord = coordinator(answers);

        // TOLERATE with 2/3 succeeded: acceptable.
        let result = coord
            .fan_out(&registry(&["p1", "p2", "p3"]), &query(DriftPolicy::Tolerate))
            .await
            .unwrap();
        assert_eq!(result.stores_failed, vec!["p3".to_string()]);
        assert_eq!(result.rows.len(), 2);

        // LATEST with a failure: hard error.
        let err = coord
            .fan_out(&registry(&["p1", "p2", "p3"]), &query(DriftPolicy::Latest))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::PartialResults { succeeded: 2, queried: 3 }));
    }

    #[test]
    fn test_byzantine_flagging() {
        let observations = vec![
            ("a".to_string(), 1.0, 1.0),
            ("b".to_string(), 0.95, 1.0),
            ("c".to_string(), 0.9, 1.0),
            ("liar".to_string(), 0.1, 1.0),
        ];
        let flagged = flag_byzantine(&observations);
        assert_eq!(flagged, vec!["liar".to_string()]);
    }

    #[test]
    fn test_byzantine_needs_three_observers() {
        let observations = vec![
            ("a".to_string(), 1.0, 1.0),
            ("b".to_string(), 0.0, 1.0),
        ];
        assert!(flag_byzantine(&observations).is_empty());
    }
}
