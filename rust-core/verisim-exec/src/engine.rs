// SPDX-License-Identifier: PMPL-1.0-or-later
//! The engine facade.
//!
//! Wires registry, stores, drift detector, normalizer, cache, prover, and
//! the optional federation handle behind one `execute(vql)` entry point.
//! Everything is an explicit resource with an explicit lifecycle - tests
//! spin fresh engines. The executor holds no mutex across a suspension
//! point: shared state is read, cloned, and released before any I/O.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use verisim_cache::{fingerprint, tags, CacheEntry, MultiLayerCache, PutTarget};
use verisim_drift::{DriftCause, DriftDetector};
use verisim_federation::{
    DriftPolicy as FedDriftPolicy, FederatedQuery, FederationCoordinator, PeerRegistry,
};
use verisim_model::{
    GraphTriple, Hexad, HexadId, HexadRegistry, Modality, ModalityPayload, Notice, Value,
};
use verisim_normalizer::Normalizer;
use verisim_proof::{
    merkle_root, CertificateBundle, ObligationPlan, PlanStrategy, ProofCertificate, ProofError,
    ProofObligation, ProofVerifier, ProofWitness,
};
use verisim_store::{
    retry_with_backoff, AuditKind, CircuitBreaker, ModalityStore, RetryPolicy, StoreError,
    StorePredicate, TemporalLog,
};
use verisim_vql::{
    parse, Condition, DeleteStmt, DriftPolicy, InsertStmt, ModalityData, Predicate, Source,
    Statement, TypeChecker, TypedMutation, TypedQuery, TypedStatement, UpdateStmt,
};

use crate::classify::{classify, Classified};
use crate::executor::{
    assemble_rows, evaluate_condition, post_process, EvalContext, OutRow, Row,
};
use crate::saga::{Compensator, Saga};
use crate::{EngineConfig, EngineError};

/// A query/mutation response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResponse {
    pub rows: Vec<OutRow>,
    pub row_count: usize,
    /// Certificates for dependent-type queries, in plan order.
    pub certificates: CertificateBundle,
    pub notices: Vec<Notice>,
    /// Rendered synthesized type, e.g. `QueryResult<...>` or `Σ(...)`.
    pub result_type: String,
}

/// EXPLAIN output: classification and routing without execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExplainReport {
    pub statement_type: String,
    pub source: String,
    pub pushdown: Option<String>,
    pub cross_modal: Option<String>,
    pub required_modalities: Vec<Modality>,
    pub proof_strategy: Option<String>,
    pub obligation_count: usize,
}

/// Optional federation wiring.
pub struct FederationHandle {
    pub coordinator: Arc<FederationCoordinator>,
    pub peers: Arc<RwLock<PeerRegistry>>,
}

/// The engine.
pub struct Engine {
    config: EngineConfig,
    checker: TypeChecker,
    stores: BTreeMap<String, Arc<dyn ModalityStore>>,
    registry: Arc<RwLock<HexadRegistry>>,
    temporal_log: Arc<dyn TemporalLog>,
    drift: Arc<DriftDetector>,
    normalizer: Arc<Normalizer>,
    cache: Arc<MultiLayerCache>,
    verifier: Arc<ProofVerifier>,
    federation: Option<FederationHandle>,
    retry: RetryPolicy,
    /// Per-store breakers: a store is Unavailable after consecutive
    /// timeouts until its cool-down probe succeeds.
    breakers: std::sync::Mutex<std::collections::HashMap<String, Arc<CircuitBreaker>>>,
}

/// Builder for the engine's explicit lifecycle.
pub struct EngineBuilder {
    config: EngineConfig,
    checker: TypeChecker,
    stores: BTreeMap<String, Arc<dyn ModalityStore>>,
    temporal_log: Option<Arc<dyn TemporalLog>>,
    drift: Option<Arc<DriftDetector>>,
    normalizer: Option<Arc<Normalizer>>,
    cache: Option<Arc<MultiLayerCache>>,
    verifier: Option<Arc<ProofVerifier>>,
    federation: Option<FederationHandle>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            checker: TypeChecker::default(),
            stores: BTreeMap::new(),
            temporal_log: None,
            drift: None,
            normalizer: None,
            cache: None,
            verifier: None,
            federation: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn checker(mut self, checker: TypeChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn store(mut self, store: Arc<dyn ModalityStore>) -> Self {
        self.stores.insert(store.store_id().to_string(), store);
        self
    }

    pub fn temporal_log(mut self, log: Arc<dyn TemporalLog>) -> Self {
        self.temporal_log = Some(log);
        self
    }

    pub fn drift(mut self, drift: Arc<DriftDetector>) -> Self {
        self.drift = Some(drift);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<Normalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn cache(mut self, cache: Arc<MultiLayerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn verifier(mut self, verifier: Arc<ProofVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn federation(mut self, handle: FederationHandle) -> Self {
        self.federation = Some(handle);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
            checker: self.checker,
            stores: self.stores,
            registry: Arc::new(RwLock::new(HexadRegistry::new())),
            temporal_log: self
                .temporal_log
                .unwrap_or_else(|| Arc::new(verisim_store::InMemoryTemporalLog::new())),
            drift: self.drift.unwrap_or_else(|| Arc::new(DriftDetector::with_defaults())),
            normalizer: self
                .normalizer
                .unwrap_or_else(|| Arc::new(Normalizer::with_defaults())),
            cache: self.cache.unwrap_or_else(|| Arc::new(MultiLayerCache::in_memory())),
            verifier: self
                .verifier
                .unwrap_or_else(|| Arc::new(ProofVerifier::with_reference_prover())),
            federation: self.federation,
            retry: RetryPolicy::default(),
            breakers: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn registry(&self) -> Arc<RwLock<HexadRegistry>> {
        self.registry.clone()
    }

    pub fn temporal_log(&self) -> Arc<dyn TemporalLog> {
        self.temporal_log.clone()
    }

    pub fn normalizer(&self) -> Arc<Normalizer> {
        self.normalizer.clone()
    }

    pub fn cache(&self) -> Arc<MultiLayerCache> {
        self.cache.clone()
    }

    fn breaker_for(&self, store_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map lock poisoned");
        breakers
            .entry(store_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::with_defaults(store_id)))
            .clone()
    }

    /// Guarded store read: breaker admission, per-call deadline, and backoff
    /// retry for recoverable failures. Consecutive timeouts open the
    /// breaker, making the store Unavailable until a probe succeeds.
    async fn guarded_read<T, F, Fut>(&self, store_id: &str, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let breaker = self.breaker_for(store_id);
        if !breaker.allow() {
            return Err(StoreError::Unavailable(store_id.to_string()));
        }
        let deadline = self.config.store_read_timeout;
        let result = retry_with_backoff(&self.retry, StoreError::recoverable, || async {
            match timeout(deadline, op()).await {
                Ok(inner) => inner,
                Err(_) => Err(StoreError::Timeout(deadline)),
            }
        })
        .await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(),
        }
        result
    }

    /// Eager, sampled drift recomputation: refresh the pairwise matrices of
    /// up to `sample` working-set hexads. Deployments schedule this from a
    /// background tick.
    pub async fn refresh_drift(&self, sample: usize) -> Result<usize, EngineError> {
        let ids = { self.registry.read().await.ids() };
        let mut observed = 0;
        for id in ids.into_iter().take(sample) {
            if let Some(hexad) = self.fetch_hexad(&id, &[]).await? {
                let _ = self.drift.observe(&hexad, DriftCause::Staleness).await;
                observed += 1;
            }
        }
        Ok(observed)
    }

    /// Execute one VQL statement under the query wall-clock deadline.
    #[instrument(skip(self, vql))]
    pub async fn execute(&self, vql: &str) -> Result<QueryResponse, EngineError> {
        match timeout(self.config.query_timeout, self.run(vql)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::QueryTimeout(self.config.query_timeout)),
        }
    }

    /// Operator inspection: fetch a hexad across every modality, bypassing
    /// no invariants (tombstones still hide it).
    pub async fn inspect_hexad(&self, id: &HexadId) -> Result<Option<Hexad>, EngineError> {
        self.fetch_hexad(id, &[]).await
    }

    /// Operator repair: re-derive one drifted pair of a hexad and write the
    /// result back.
    pub async fn repair_drift(
        &self,
        id: &HexadId,
        a: Modality,
        b: Modality,
    ) -> Result<verisim_normalizer::RepairOutcome, EngineError> {
        let mut hexad = self
            .fetch_hexad(id, &[])
            .await?
            .ok_or_else(|| verisim_model::ModelError::NotFound(id.to_string()))?;
        let outcome = self.normalizer.repair(&mut hexad, a, b).await?;
        if outcome.changed {
            self.persist_repaired(&hexad).await;
        }
        Ok(outcome)
    }

    /// Describe how a statement would execute, without executing it.
    pub fn explain(&self, vql: &str) -> Result<ExplainReport, EngineError> {
        let statement = parse(vql)?;
        match self.checker.check_statement(statement)? {
            TypedStatement::Query(typed) => {
                let classified = typed
                    .query
                    .where_clause
                    .as_ref()
                    .map(|c| classify(c))
                    .unwrap_or_default();
                Ok(ExplainReport {
                    statement_type: "SELECT".to_string(),
                    source: describe_source(&typed.query.source),
                    pushdown: classified.pushdown.as_ref().map(|p| format!("{p:?}")),
                    cross_modal: classified.cross_modal.as_ref().map(|c| format!("{c:?}")),
                    required_modalities: typed.required_modalities.clone(),
                    proof_strategy: typed.proof_plan.as_ref().map(|p| format!("{:?}", p.strategy)),
                    obligation_count: typed
                        .proof_plan
                        .as_ref()
                        .map(|p| p.obligations().count())
                        .unwrap_or(0),
                })
            }
            TypedStatement::Mutation(typed) => Ok(ExplainReport {
                statement_type: match &typed.statement {
                    Statement::Insert(_) => "INSERT",
                    Statement::Update(_) => "UPDATE",
                    Statement::Delete(_) => "DELETE",
                    Statement::Query(_) => "SELECT",
                }
                .to_string(),
                source: "mutation".to_string(),
                pushdown: None,
                cross_modal: None,
                required_modalities: Vec::new(),
                proof_strategy: typed.proof_plan.as_ref().map(|p| format!("{:?}", p.strategy)),
                obligation_count: typed
                    .proof_plan
                    .as_ref()
                    .map(|p| p.obligations().count())
                    .unwrap_or(0),
            }),
        }
    }

    async fn run(&self, vql: &str) -> Result<QueryResponse, EngineError> {
        let statement = parse(vql)?;
        match self.checker.check_statement(statement)? {
            TypedStatement::Query(typed) => self.run_query(vql, typed).await,
            TypedStatement::Mutation(typed) => self.run_mutation(typed).await,
        }
    }

    // -- queries -----------------------------------------------------------

    async fn run_query(&self, vql: &str, typed: TypedQuery) -> Result<QueryResponse, EngineError> {
        let is_proof_query = typed.proof_plan.is_some();
        let cache_key = fingerprint(vql);
        let cache_policy = if is_proof_query {
            self.config.proof_cache
        } else {
            self.config.slipstream_cache
        };

        // Cache lookup. Dependent-type results are only present when the
        // policy permitted caching them.
        if let Some(entry) = self.cache.get(&cache_key).await? {
            if let Ok(rows) = serde_json::from_value::<Vec<OutRow>>(entry.value.clone()) {
                debug!(key = %cache_key, "cache hit");
                return Ok(QueryResponse {
                    row_count: rows.len(),
                    rows,
                    certificates: CertificateBundle::default(),
                    notices: vec![Notice::info("served from cache")],
                    result_type: typed.result_type.to_string(),
                });
            }
        }

        let classified = typed
            .query
            .where_clause
            .as_ref()
            .map(|c| classify(c))
            .unwrap_or_default();

        let mut notices = Vec::new();
        let mut rows = self.route(&typed, &classified, &mut notices).await?;

        // Quarantined hexads are invisible to default queries.
        let mut kept = Vec::new();
        for row in rows {
            if self.normalizer.is_quarantined(&row.hexad.id).await {
                notices.push(Notice::warning(format!(
                    "hexad {} skipped: quarantined",
                    row.hexad.id
                )));
            } else {
                kept.push(row);
            }
        }
        rows = kept;

        // Pull-mode repairs resolve transparently on read.
        for row in rows.iter_mut() {
            if self.normalizer.has_pending_pull(&row.hexad.id).await {
                if let Ok(Some(outcome)) = self.normalizer.resolve_on_read(&mut row.hexad).await {
                    if outcome.changed {
                        self.persist_repaired(&row.hexad).await;
                    }
                }
            }
        }

        // Queries with DRIFT predicates recompute scores lazily on read.
        if typed
            .query
            .where_clause
            .as_ref()
            .map(condition_has_drift)
            .unwrap_or(false)
        {
            for row in &rows {
                let _ = self.drift.observe(&row.hexad, DriftCause::Staleness).await;
            }
        }

        // Evaluate the complete WHERE tree per row. Store scans already
        // applied the pushdown part; re-evaluation keeps HEXAD and
        // FEDERATION sources correct and is idempotent for scans.
        let ctx = EvalContext::default();
        if let Some(cond) = &typed.query.where_clause {
            let mut filtered = Vec::new();
            for row in rows {
                if evaluate_condition(cond, &row, &ctx)? {
                    filtered.push(row);
                }
            }
            rows = filtered;
        }

        // Dependent-type path: discharge the proof plan before results
        // leave the executor.
        let certificates = match &typed.proof_plan {
            Some(plan) => self.discharge_plan(plan, &rows).await?,
            None => CertificateBundle::default(),
        };

        let out_rows = post_process(&typed, rows, &ctx)?;

        // Cache the result with its dependency tags.
        let mut entry_tags: Vec<String> = out_rows
            .iter()
            .filter_map(|r| r.get("id"))
            .filter_map(|v| v.as_str().map(|s| tags::hexad(s)))
            .collect();
        for m in &typed.required_modalities {
            entry_tags.push(tags::modality(m.as_str()));
        }
        if let Source::Federation { pattern, .. } = &typed.query.source {
            entry_tags.push(tags::federation(pattern));
        }
        if is_proof_query {
            entry_tags.push(tags::ZKP.to_string());
        }
        if let Ok(value) = serde_json::to_value(&out_rows) {
            let entry = CacheEntry::new(cache_key, value, cache_policy, entry_tags);
            match self
                .cache
                .put(entry, PutTarget::L1AndL2, cache_policy, is_proof_query)
                .await
            {
                Ok(()) => {}
                Err(verisim_cache::CacheError::ProofCachingDenied) => {
                    debug!("proof result not cached under policy");
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(rows = out_rows.len(), proofs = certificates.len(), "query executed");
        Ok(QueryResponse {
            row_count: out_rows.len(),
            rows: out_rows,
            certificates,
            notices,
            result_type: typed.result_type.to_string(),
        })
    }

    /// Route the query to its source and assemble rows.
    async fn route(
        &self,
        typed: &TypedQuery,
        classified: &Classified,
        notices: &mut Vec<Notice>,
    ) -> Result<Vec<Row>, EngineError> {
        match &typed.query.source {
            Source::Hexad { id, .. } => {
                let id = HexadId::new(id.clone());
                match self.fetch_hexad(&id, &typed.required_modalities).await? {
                    Some(hexad) => Ok(vec![Row::local(hexad)]),
                    None => Ok(Vec::new()),
                }
            }
            Source::Store { store_id, .. } => {
                let store = self
                    .stores
                    .get(store_id)
                    .ok_or_else(|| EngineError::UnknownStore(store_id.clone()))?;
                let predicate = classified.pushdown.clone().unwrap_or(StorePredicate::True);
                // Pagination can only push down when nothing reorders or
                // regroups rows afterwards.
                let early_limit = if classified.is_fully_pushdown()
                    && typed.query.group_by.is_empty()
                    && typed.query.order_by.is_empty()
                {
                    typed.query.limit.map(|l| l + typed.query.offset.unwrap_or(0)).unwrap_or(0)
                } else {
                    0
                };
                let scan_rows = self
                    .guarded_read(store_id, || store.scan(&predicate, early_limit, 0))
                    .await?;
                Ok(assemble_rows(scan_rows, Some(store_id)))
            }
            Source::Federation { pattern, policy, .. } => {
                let Some(federation) = &self.federation else {
                    return Err(EngineError::Federation(
                        verisim_federation::FederationError::Unreachable(
                            "no federation configured".to_string(),
                        ),
                    ));
                };
                let query = FederatedQuery {
                    pattern: pattern.clone(),
                    required_modalities: typed.required_modalities.clone(),
                    predicate: classified.pushdown.clone().unwrap_or(StorePredicate::True),
                    limit: typed.query.limit.unwrap_or(0),
                    policy: map_policy(*policy),
                };
                let peers = federation.peers.read().await.clone();
                let result = federation.coordinator.fan_out(&peers, &query).await?;

                if !result.stores_failed.is_empty() {
                    notices.push(Notice::warning(format!(
                        "partial results: {} peer(s) failed",
                        result.stores_failed.len()
                    )));
                }
                for suspect in &result.byzantine_suspects {
                    notices.push(Notice::warning(format!(
                        "peer {suspect} flagged by deviation heuristic"
                    )));
                }

                // Group annotated rows into hexads per (id, source store) so
                // TOLERATE can carry diverging versions side by side.
                let mut grouped: BTreeMap<(HexadId, String), Row> = BTreeMap::new();
                for annotated in result.rows {
                    let key = (annotated.row.id.clone(), annotated.source_store.clone());
                    let entry = grouped.entry(key.clone()).or_insert_with(|| Row {
                        hexad: Hexad::new(key.0.clone()),
                        source_store: Some(key.1.clone()),
                        drifted: false,
                    });
                    entry.drifted |= annotated.drifted;
                    let _ = entry
                        .hexad
                        .put_versioned(annotated.row.payload, annotated.row.version);
                }
                let rows: Vec<Row> = grouped.into_values().collect();

                // REPAIR policy: hand conflicted hexads to the normalizer.
                for candidate in &result.repair_candidates {
                    if let Some(row) = rows.iter().find(|r| &r.hexad.id == candidate) {
                        let mut hexad = row.hexad.clone();
                        match self
                            .normalizer
                            .repair(&mut hexad, Modality::Document, Modality::Vector)
                            .await
                        {
                            Ok(outcome) if outcome.changed => self.persist_repaired(&hexad).await,
                            Ok(_) => {}
                            Err(err) => warn!(%err, id = %candidate, "federated repair failed"),
                        }
                    }
                }

                Ok(rows)
            }
        }
    }

    /// Fetch one hexad across its owning stores.
    async fn fetch_hexad(
        &self,
        id: &HexadId,
        modalities: &[Modality],
    ) -> Result<Option<Hexad>, EngineError> {
        {
            let registry = self.registry.read().await;
            if registry.is_tombstoned(id) {
                return Ok(None);
            }
        }

        let mut hexad = Hexad::new(id.clone());
        let mut found = false;
        let wanted: Vec<Modality> = if modalities.is_empty() {
            Modality::ALL.to_vec()
        } else {
            modalities.to_vec()
        };

        for modality in wanted {
            let store = self.store_for(id, modality).await;
            let Some(store) = store else { continue };
            let fetched = self
                .guarded_read(store.store_id(), || store.get(id, modality))
                .await?;
            if let Some((payload, version)) = fetched {
                hexad.put_versioned(payload, version)?;
                found = true;
            }
        }
        Ok(found.then_some(hexad))
    }

    /// Owning store for a modality: the registry mapping when present,
    /// otherwise the first registered store advertising the modality.
    async fn store_for(&self, id: &HexadId, modality: Modality) -> Option<Arc<dyn ModalityStore>> {
        let mapped = {
            let registry = self.registry.read().await;
            registry.owning_store(id, modality).map(String::from)
        };
        if let Some(store_id) = mapped {
            return self.stores.get(&store_id).cloned();
        }
        self.stores
            .values()
            .find(|s| s.advertise().contains(&modality))
            .cloned()
    }

    /// Best-effort write-back of a repaired hexad.
    async fn persist_repaired(&self, hexad: &Hexad) {
        for (modality, record) in &hexad.records {
            if let Some(store) = self.store_for(&hexad.id, *modality).await {
                let next_version = match store.get(&hexad.id, *modality).await {
                    Ok(Some((_, version))) => version + 1,
                    _ => record.version,
                };
                if let Err(err) = store
                    .put(&hexad.id, record.payload.clone(), next_version)
                    .await
                {
                    warn!(%err, id = %hexad.id, %modality, "repair write-back failed");
                    continue;
                }
            }
        }
        let _ = self
            .temporal_log
            .append(
                AuditKind::Repair,
                Some(hexad.id.clone()),
                hexad.present_modalities(),
                "normalizer write-back".to_string(),
            )
            .await;
        let _ = self.cache.invalidate_tag(&tags::hexad(hexad.id.as_str())).await;
    }

    // -- proofs ------------------------------------------------------------

    /// Discharge a composed proof plan over the fetched rows.
    ///
    /// Sequential plans verify group by group in order; Independent plans
    /// are parallelizable and run concurrently. Within a group, OR
    /// alternatives are tried left to right and the first success yields
    /// the certificate.
    async fn discharge_plan(
        &self,
        plan: &ObligationPlan,
        rows: &[Row],
    ) -> Result<CertificateBundle, EngineError> {
        let mut certificates = Vec::with_capacity(plan.len());
        match plan.strategy {
            PlanStrategy::Sequential => {
                for group in &plan.groups {
                    certificates.push(self.discharge_group(group, rows).await?);
                }
            }
            PlanStrategy::Independent => {
                let futures: Vec<_> = plan
                    .groups
                    .iter()
                    .map(|group| self.discharge_group(group, rows))
                    .collect();
                for result in futures::future::join_all(futures).await {
                    certificates.push(result?);
                }
            }
        }
        Ok(CertificateBundle::new(certificates))
    }

    /// Try a group's alternatives in order; the first verified obligation
    /// wins. Proof failures are fatal when every alternative fails.
    async fn discharge_group(
        &self,
        group: &[ProofObligation],
        rows: &[Row],
    ) -> Result<ProofCertificate, EngineError> {
        let mut last_error: Option<ProofError> = None;
        for obligation in group {
            let witness = self.collect_witness(obligation, rows);
            // Prover transport failures retry with backoff; rejections are
            // final immediately.
            let attempt = retry_with_backoff(&self.retry, ProofError::recoverable, || async {
                match timeout(
                    self.config.proof_timeout,
                    self.verifier.discharge(obligation.clone(), witness.clone()),
                )
                .await
                {
                    Ok(inner) => inner,
                    Err(_) => Err(ProofError::ProverUnreachable(format!(
                        "deadline {:?} exceeded",
                        self.config.proof_timeout
                    ))),
                }
            })
            .await;
            match attempt {
                Ok(certificate) => return Ok(certificate),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error
            .map(EngineError::Proof)
            .unwrap_or_else(|| EngineError::Internal("empty proof group".to_string())))
    }

    /// Assemble the runtime witness for one obligation from the fetched
    /// rows. Witness fields carry hashes and structural facts only - never
    /// query text.
    fn collect_witness(&self, obligation: &ProofObligation, rows: &[Row]) -> ProofWitness {
        let first = rows.first();
        let mut witness = ProofWitness::new();
        for field in &obligation.witness_fields {
            let value = match field.as_str() {
                "hexad_id" => serde_json::json!(first.map(|r| r.hexad.id.to_string())),
                "modality_presence" => serde_json::json!(first
                    .map(|r| r
                        .hexad
                        .present_modalities()
                        .iter()
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>())
                    .unwrap_or_default()),
                "content_hashes" => {
                    let hashes: Vec<String> = first
                        .map(|r| {
                            r.hexad
                                .records
                                .values()
                                .map(|rec| rec.content_hash.clone())
                                .collect()
                        })
                        .unwrap_or_default();
                    serde_json::json!(hashes)
                }
                "merkle_root" => {
                    let leaves: Vec<Vec<u8>> = first
                        .map(|r| {
                            r.hexad
                                .records
                                .values()
                                .map(|rec| rec.content_hash.as_bytes().to_vec())
                                .collect()
                        })
                        .unwrap_or_default();
                    let root: String = merkle_root(&leaves)
                        .iter()
                        .map(|b| format!("{b:02x}"))
                        .collect();
                    serde_json::json!(root)
                }
                "embedding_a" | "embedding_b" => {
                    let modality = if field == "embedding_a" {
                        Modality::Document
                    } else {
                        Modality::Vector
                    };
                    let embedding = first
                        .and_then(|r| r.hexad.records.get(&modality))
                        .map(|rec| verisim_drift::derive_embedding(rec, Default::default()))
                        .unwrap_or_default();
                    serde_json::json!(embedding)
                }
                "drift_threshold" => serde_json::json!(0.3),
                "last_modified" => serde_json::json!(first
                    .map(|r| r.hexad.modified_at.to_rfc3339())
                    .unwrap_or_default()),
                "max_age_secs" => serde_json::json!(self.config.freshness_max_age_secs),
                "source_chain" => first
                    .and_then(|r| r.hexad.payload(Modality::Semantic))
                    .map(|p| serde_json::json!(p.field("source").to_string()))
                    .unwrap_or_else(|| serde_json::json!([])),
                "citations" => first
                    .and_then(|r| r.hexad.payload(Modality::Semantic))
                    .map(|p| serde_json::json!(p.field("citations").to_string()))
                    .unwrap_or_else(|| serde_json::json!([])),
                "principal" => serde_json::json!("engine"),
                "capability" => serde_json::json!("query"),
                "opaque" => serde_json::json!({ "circuit": obligation.circuit_id }),
                other => serde_json::json!(format!("unsupported witness field {other}")),
            };
            witness = witness.with(field.clone(), value);
        }
        witness
    }

    // -- mutations ---------------------------------------------------------

    async fn run_mutation(&self, typed: TypedMutation) -> Result<QueryResponse, EngineError> {
        // Proofs verify before any store is touched.
        if let Some(plan) = &typed.proof_plan {
            self.discharge_plan(plan, &[]).await?;
        }

        match &typed.statement {
            Statement::Insert(insert) => self.run_insert(insert).await,
            Statement::Update(update) => self.run_update(update).await,
            Statement::Delete(delete) => self.run_delete(delete).await,
            Statement::Query(_) => Err(EngineError::Internal(
                "query routed to mutation path".to_string(),
            )),
        }
    }

    #[instrument(skip(self, insert))]
    async fn run_insert(&self, insert: &InsertStmt) -> Result<QueryResponse, EngineError> {
        let id = HexadId::generate();
        let payloads: Vec<ModalityPayload> = insert
            .data
            .iter()
            .filter(|d| !d.fields.is_empty())
            .map(payload_from_data)
            .collect();

        // Parallel forward writes, one saga step each.
        let mut writes = Vec::new();
        for payload in &payloads {
            let modality = payload.modality();
            let store = self
                .store_for(&id, modality)
                .await
                .ok_or(StoreError::ModalityNotServed {
                    store_id: "(none)".to_string(),
                    modality,
                })?;
            let payload = payload.clone();
            let id = id.clone();
            let deadline = self.config.store_write_timeout;
            writes.push(async move {
                let result = timeout(deadline, store.put(&id, payload, 1))
                    .await
                    .map_err(|_| StoreError::Timeout(deadline))
                    .and_then(|r| r);
                (store, modality, result)
            });
        }
        let outcomes = futures::future::join_all(writes).await;

        let mut saga = Saga::begin(Some(id.clone()));
        let mut failure: Option<StoreError> = None;
        for (store, modality, result) in outcomes {
            match result {
                Ok(()) => saga.record(
                    format!("write {modality} to {}", store.store_id()),
                    modality,
                    Compensator::Delete {
                        store,
                        id: id.clone(),
                    },
                ),
                Err(err) => {
                    saga.note(
                        format!("write {modality} to {} failed: {err}", store.store_id()),
                        modality,
                    );
                    failure = Some(err);
                }
            }
        }

        if let Some(err) = failure {
            saga.rollback(self.temporal_log.as_ref()).await?;
            return Err(err.into());
        }

        // Registry mapping, temporal log, cache invalidation.
        {
            let mut registry = self.registry.write().await;
            for payload in &payloads {
                let modality = payload.modality();
                if let Some(store) = self.stores.values().find(|s| s.advertise().contains(&modality)) {
                    registry.map_hexad(id.clone(), modality, store.store_id().to_string());
                }
            }
        }
        let modalities: Vec<Modality> = payloads.iter().map(|p| p.modality()).collect();
        self.temporal_log
            .append(
                AuditKind::Insert,
                Some(id.clone()),
                modalities.clone(),
                String::new(),
            )
            .await?;
        saga.commit(self.temporal_log.as_ref()).await?;

        let mut invalidation = vec![tags::hexad(id.as_str())];
        for m in &modalities {
            invalidation.push(tags::modality(m.as_str()));
        }
        self.cache.invalidate_tags(&invalidation).await?;

        info!(%id, "hexad inserted");
        Ok(mutation_response("INSERT", &id))
    }

    #[instrument(skip(self, update))]
    async fn run_update(&self, update: &UpdateStmt) -> Result<QueryResponse, EngineError> {
        let id = HexadId::new(update.id.clone());
        {
            let registry = self.registry.read().await;
            if registry.is_tombstoned(&id) {
                return Err(verisim_model::ModelError::Tombstoned(id.to_string()).into());
            }
        }

        let mut saga = Saga::begin(Some(id.clone()));
        let mut touched = Vec::new();
        let mut failure: Option<EngineError> = None;

        for (field, value) in &update.sets {
            let modality = field.modality;
            let Some(store) = self.store_for(&id, modality).await else {
                failure = Some(
                    StoreError::ModalityNotServed {
                        store_id: "(none)".to_string(),
                        modality,
                    }
                    .into(),
                );
                break;
            };

            let current = match timeout(self.config.store_read_timeout, store.get(&id, modality))
                .await
                .map_err(|_| StoreError::Timeout(self.config.store_read_timeout))
            {
                Ok(Ok(current)) => current,
                Ok(Err(err)) => {
                    failure = Some(err.into());
                    break;
                }
                Err(err) => {
                    failure = Some(err.into());
                    break;
                }
            };

            let (old_payload, old_version) = match current {
                Some(pair) => pair,
                None => {
                    failure = Some(
                        verisim_model::ModelError::ModalityAbsent {
                            id: id.to_string(),
                            modality,
                        }
                        .into(),
                    );
                    break;
                }
            };

            let new_payload = payload_with_field(&old_payload, &field.field, value.clone());
            let write = timeout(
                self.config.store_write_timeout,
                store.put(&id, new_payload, old_version + 1),
            )
            .await
            .map_err(|_| StoreError::Timeout(self.config.store_write_timeout))
            .and_then(|r| r.map_err(Into::into));

            match write {
                Ok(()) => {
                    touched.push(modality);
                    saga.record(
                        format!("set {}.{}", modality, field.field),
                        modality,
                        Compensator::Restore {
                            store,
                            id: id.clone(),
                            payload: old_payload,
                            version: old_version + 2,
                        },
                    );
                }
                Err(err) => {
                    failure = Some(EngineError::Store(err));
                    break;
                }
            }
        }

        if let Some(err) = failure {
            saga.rollback(self.temporal_log.as_ref()).await?;
            return Err(err);
        }

        self.temporal_log
            .append(AuditKind::Update, Some(id.clone()), touched.clone(), String::new())
            .await?;
        saga.commit(self.temporal_log.as_ref()).await?;

        let mut invalidation = vec![tags::hexad(id.as_str())];
        for m in &touched {
            invalidation.push(tags::modality(m.as_str()));
        }
        self.cache.invalidate_tags(&invalidation).await?;

        info!(%id, "hexad updated");
        Ok(mutation_response("UPDATE", &id))
    }

    #[instrument(skip(self, delete))]
    async fn run_delete(&self, delete: &DeleteStmt) -> Result<QueryResponse, EngineError> {
        let id = HexadId::new(delete.id.clone());

        // Tombstone; physical removal is deferred to the temporal store.
        {
            let mut registry = self.registry.write().await;
            registry.tombstone(id.clone());
        }
        self.temporal_log
            .append(AuditKind::Tombstone, Some(id.clone()), Vec::new(), String::new())
            .await?;

        let invalidation = vec![tags::hexad(id.as_str())];
        self.cache.invalidate_tags(&invalidation).await?;

        info!(%id, "hexad tombstoned");
        Ok(mutation_response("DELETE", &id))
    }
}

/// Build the response for a completed mutation.
fn mutation_response(kind: &str, id: &HexadId) -> QueryResponse {
    let mut row = OutRow::new();
    row.insert("id".to_string(), Value::Str(id.to_string()));
    QueryResponse {
        rows: vec![row],
        row_count: 1,
        certificates: CertificateBundle::default(),
        notices: vec![Notice::info(format!("{kind} {id}"))],
        result_type: "MutationResult".to_string(),
    }
}

/// Convert parsed modality data into a payload.
fn payload_from_data(data: &ModalityData) -> ModalityPayload {
    let fields = &data.fields;
    let get = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    match data.modality {
        Modality::Document => {
            let mut rest: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in fields {
                if k != "title" && k != "body" {
                    rest.insert(k.clone(), v.clone());
                }
            }
            ModalityPayload::Document {
                title: get("title").and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
                body: get("body").and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
                fields: rest,
            }
        }
        Modality::Vector => ModalityPayload::Vector {
            embedding: match get("embedding") {
                Some(Value::Vector(v)) => v,
                _ => Vec::new(),
            },
            model: get("model").and_then(|v| v.as_str().map(String::from)),
        },
        Modality::Tensor => ModalityPayload::Tensor {
            shape: match get("shape") {
                Some(Value::Vector(v)) => v.iter().map(|x| *x as usize).collect(),
                _ => match get("data") {
                    Some(Value::Vector(v)) => vec![v.len()],
                    _ => Vec::new(),
                },
            },
            data: match get("data") {
                Some(Value::Vector(v)) => v.iter().map(|x| *x as f64).collect(),
                _ => Vec::new(),
            },
        },
        Modality::Semantic => ModalityPayload::Semantic {
            types: get("types")
                .and_then(|v| v.as_str().map(|s| s.split(',').map(String::from).collect()))
                .unwrap_or_default(),
            claims: fields
                .iter()
                .filter(|(k, _)| k != "types")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        },
        // Each graph field assignment `edge: target` becomes a triple with
        // the new hexad as subject.
        Modality::Graph => ModalityPayload::Graph {
            triples: fields
                .iter()
                .filter_map(|(edge, target)| {
                    target
                        .as_str()
                        .map(|t| GraphTriple::new("", edge.clone(), t.to_string()))
                })
                .collect(),
        },
        Modality::Temporal => ModalityPayload::Temporal {
            versions: vec![verisim_model::VersionStamp {
                version: 1,
                timestamp: chrono::Utc::now(),
                change: "insert".to_string(),
            }],
        },
    }
}

/// Apply one `SET MOD.field = value` to an existing payload.
fn payload_with_field(payload: &ModalityPayload, field: &str, value: Value) -> ModalityPayload {
    let mut updated = payload.clone();
    match &mut updated {
        ModalityPayload::Document { title, body, fields } => match field {
            "title" => {
                if let Some(s) = value.as_str() {
                    *title = s.to_string();
                }
            }
            "body" => {
                if let Some(s) = value.as_str() {
                    *body = s.to_string();
                }
            }
            _ => {
                fields.insert(field.to_string(), value);
            }
        },
        ModalityPayload::Semantic { claims, .. } => {
            claims.insert(field.to_string(), value);
        }
        ModalityPayload::Vector { embedding, model } => match (field, value) {
            ("embedding", Value::Vector(v)) => *embedding = v,
            ("model", v) => *model = v.as_str().map(String::from),
            _ => {}
        },
        ModalityPayload::Tensor { shape, data } => match (field, value) {
            ("data", Value::Vector(v)) => {
                *data = v.iter().map(|x| *x as f64).collect();
                *shape = vec![data.len()];
            }
            _ => {}
        },
        ModalityPayload::Graph { triples } => {
            if let Some(target) = value.as_str() {
                triples.push(GraphTriple::new("", field.to_string(), target.to_string()));
            }
        }
        ModalityPayload::Temporal { .. } => {}
    }
    updated
}

fn describe_source(source: &Source) -> String {
    match source {
        Source::Hexad { id, .. } => format!("HEXAD {id} (point lookup via registry)"),
        Source::Federation { pattern, policy, .. } => {
            format!("FEDERATION {pattern} (drift policy {policy:?})")
        }
        Source::Store { store_id, .. } => format!("STORE {store_id} (pushdown scan)"),
    }
}

fn map_policy(policy: DriftPolicy) -> FedDriftPolicy {
    match policy {
        DriftPolicy::Strict => FedDriftPolicy::Strict,
        DriftPolicy::Repair => FedDriftPolicy::Repair,
        DriftPolicy::Tolerate => FedDriftPolicy::Tolerate,
        DriftPolicy::Latest => FedDriftPolicy::Latest,
    }
}

fn condition_has_drift(cond: &Condition) -> bool {
    match cond {
        Condition::And(a, b) | Condition::Or(a, b) => {
            condition_has_drift(a) || condition_has_drift(b)
        }
        Condition::Not(inner) => condition_has_drift(inner),
        Condition::Pred(pred) => matches!(
            pred,
            Predicate::Drift { .. } | Predicate::Consistent { .. }
        ),
    }
}
