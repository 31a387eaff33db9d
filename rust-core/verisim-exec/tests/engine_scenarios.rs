// SPDX-License-Identifier: PMPL-1.0-or-later
//! End-to-end engine scenarios: slipstream queries, cross-modal drift over
//! a federation, dependent-type proofs, saga rollback, and deterministic
//! grouping.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use verisim_drift::char_fingerprint;
use verisim_exec::{Engine, EngineError, QueryResponse};
use verisim_federation::{
    FederatedQuery, FederationConfig, FederationCoordinator, FederationError, PeerQueryClient,
    PeerRegistry, PeerStore,
};
use verisim_model::{HexadId, Modality, ModalityPayload, Value};
use verisim_store::{AuditKind, InMemoryModalityStore, ModalityStore, ScanRow, TemporalLog};

fn doc_payload(title: &str, body: &str, severity: Option<i64>) -> ModalityPayload {
    let mut fields = std::collections::BTreeMap::new();
    if let Some(s) = severity {
        fields.insert("severity".to_string(), Value::Int(s));
    }
    ModalityPayload::Document {
        title: title.to_string(),
        body: body.to_string(),
        fields,
    }
}

fn vector_payload(embedding: Vec<f32>) -> ModalityPayload {
    ModalityPayload::Vector {
        embedding,
        model: None,
    }
}

async fn engine_with_store(store: Arc<InMemoryModalityStore>) -> Engine {
    Engine::builder().store(store).build()
}

// -- Scenario 1: slipstream multi-modal query ------------------------------

#[tokio::test]
async fn slipstream_query_returns_matching_row() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let id = HexadId::new("ent-1");
    store
        .put(&id, doc_payload("X", "body", Some(5)), 1)
        .await
        .unwrap();
    store
        .put(&id, vector_payload(vec![0.1, 0.2, 0.3]), 1)
        .await
        .unwrap();

    let engine = engine_with_store(store).await;
    let response = engine
        .execute(
            "SELECT DOCUMENT.title, DOCUMENT.severity FROM HEXAD ent-1 WHERE DOCUMENT.severity > 3 LIMIT 10",
        )
        .await
        .unwrap();

    assert_eq!(response.row_count, 1);
    assert_eq!(response.rows[0]["document.title"], Value::Str("X".to_string()));
    assert_eq!(response.rows[0]["document.severity"], Value::Int(5));
    assert!(response.result_type.starts_with("QueryResult"));
    assert!(response.certificates.is_empty());
}

#[tokio::test]
async fn slipstream_filter_excludes_non_matching() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let id = HexadId::new("ent-1");
    store
        .put(&id, doc_payload("X", "body", Some(2)), 1)
        .await
        .unwrap();

    let engine = engine_with_store(store).await;
    let response = engine
        .execute("SELECT DOCUMENT.title FROM HEXAD ent-1 WHERE DOCUMENT.severity > 3")
        .await
        .unwrap();
    assert_eq!(response.row_count, 0);
}

// -- Scenario 2: cross-modal drift over a federation -----------------------

struct LocalPeerClient {
    stores: HashMap<String, Arc<InMemoryModalityStore>>,
}

#[async_trait]
impl PeerQueryClient for LocalPeerClient {
    async fn query(
        &self,
        peer: &PeerStore,
        query: &FederatedQuery,
    ) -> Result<Vec<ScanRow>, FederationError> {
        let store = self
            .stores
            .get(&peer.store_id)
            .ok_or_else(|| FederationError::Unreachable(peer.store_id.clone()))?;
        store
            .scan(&query.predicate, query.limit, 0)
            .await
            .map_err(|e| FederationError::Unreachable(e.to_string()))
    }
}

#[tokio::test]
async fn federation_drift_query_finds_only_drifted_hexad() {
    // ent-A: vector embedding derived from the document's own text.
    let peer_store = Arc::new(InMemoryModalityStore::full("peer-1"));
    let a = HexadId::new("ent-A");
    let text = "shared descriptive text";
    peer_store
        .put(&a, doc_payload("Title", text, None), 1)
        .await
        .unwrap();
    let aligned: Vec<f32> = char_fingerprint(&format!("Title\n{text}"))
        .into_iter()
        .map(|v| v as f32)
        .collect();
    peer_store.put(&a, vector_payload(aligned), 1).await.unwrap();

    // ent-B: embedding disjoint from the document fingerprint.
    let b = HexadId::new("ent-B");
    peer_store
        .put(&b, doc_payload("Other", "unrelated words", None), 1)
        .await
        .unwrap();
    peer_store
        .put(&b, vector_payload(vec![0.0, 0.0, 0.0, 1.0]), 1)
        .await
        .unwrap();

    let mut peers = PeerRegistry::new();
    peers.insert(PeerStore::new("peer-1", "local://peer-1", Modality::ALL.to_vec()));

    let client = LocalPeerClient {
        stores: HashMap::from([("peer-1".to_string(), peer_store)]),
    };
    let coordinator = Arc::new(FederationCoordinator::new(
        FederationConfig::default(),
        Arc::new(client),
    ));

    let engine = Engine::builder()
        .federation(verisim_exec::FederationHandle {
            coordinator,
            peers: Arc::new(RwLock::new(peers)),
        })
        .build();

    let response = engine
        .execute("SELECT * FROM FEDERATION /* WITH DRIFT TOLERATE WHERE DRIFT(DOCUMENT, VECTOR) > 0.3")
        .await
        .unwrap();

    assert_eq!(response.row_count, 1);
    assert_eq!(response.rows[0]["id"], Value::Str("ent-B".to_string()));
}

// -- Scenario 3: dependent-type query --------------------------------------

#[tokio::test]
async fn dependent_type_query_carries_certificates() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let id = HexadId::new("ent-1");
    store
        .put(
            &id,
            ModalityPayload::Semantic {
                types: vec!["http://example.org/Claim".to_string()],
                claims: std::collections::BTreeMap::from([(
                    "asserted".to_string(),
                    Value::Bool(true),
                )]),
            },
            1,
        )
        .await
        .unwrap();

    let engine = engine_with_store(store).await;
    let response = engine
        .execute("SELECT SEMANTIC FROM HEXAD ent-1 PROOF EXISTENCE(presence) AND INTEGRITY(tamper-free)")
        .await
        .unwrap();

    // Two-obligation composed plan, Independent strategy, two certificates.
    let explain = engine
        .explain("SELECT SEMANTIC FROM HEXAD ent-1 PROOF EXISTENCE(presence) AND INTEGRITY(tamper-free)")
        .unwrap();
    assert_eq!(explain.obligation_count, 2);
    assert_eq!(explain.proof_strategy.as_deref(), Some("Independent"));

    assert_eq!(response.certificates.len(), 2);
    assert!(response.certificates.verify_all().is_ok());
    assert!(response.result_type.starts_with("Σ"));

    // Mutating any certificate breaks verification.
    let mut tampered = response.certificates.clone();
    tampered.certificates[0].witness = tampered.certificates[0]
        .witness
        .clone()
        .with("hexad_id", serde_json::json!("forged"));
    assert!(tampered.verify_all().is_err());
}

#[tokio::test]
async fn proof_failure_is_fatal_to_the_query() {
    // No hexad exists: the Existence witness has no present modalities.
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let engine = engine_with_store(store).await;
    let err = engine
        .execute("SELECT SEMANTIC FROM HEXAD missing PROOF EXISTENCE(presence)")
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(!err.recoverable());
}

// -- Scenario 5: INSERT saga rollback --------------------------------------

#[tokio::test]
async fn insert_saga_rolls_back_on_partial_failure() {
    let docs = Arc::new(InMemoryModalityStore::new("docs", vec![Modality::Document]));
    let vecs = Arc::new(InMemoryModalityStore::new("vecs", vec![Modality::Vector]));
    vecs.fail_puts_after(0); // the vector write fails

    let engine = Engine::builder()
        .store(docs.clone())
        .store(vecs.clone())
        .build();

    let err = engine
        .execute(
            "INSERT HEXAD WITH DOCUMENT { title: \"X\", body: \"b\" }, VECTOR { embedding: [0.1, 0.2] }",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    // Document write compensated: nothing remains in the document store.
    assert!(docs.is_empty().await);

    // No entry in the public registry.
    assert!(engine.registry().read().await.is_empty());

    // Audit log carries a saga_rollback entry referencing both steps.
    let entries = engine.temporal_log().entries().await.unwrap();
    let rollback = entries
        .iter()
        .find(|e| e.kind == AuditKind::SagaRollback)
        .expect("saga_rollback entry");
    assert!(rollback.detail.contains("saga_rollback"));
    assert!(rollback.detail.contains("document"));
    assert!(rollback.detail.contains("vector"));
}

#[tokio::test]
async fn insert_commits_and_registers_on_success() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let engine = engine_with_store(store.clone()).await;

    let response = engine
        .execute("INSERT HEXAD WITH DOCUMENT { title: \"X\", body: \"b\" }")
        .await
        .unwrap();
    let Value::Str(id) = &response.rows[0]["id"] else { panic!() };

    assert_eq!(store.len().await, 1);
    let registry = engine.registry();
    let registry = registry.read().await;
    assert_eq!(
        registry.owning_store(&HexadId::new(id.clone()), Modality::Document),
        Some("s")
    );

    let entries = engine.temporal_log().entries().await.unwrap();
    assert!(entries.iter().any(|e| e.kind == AuditKind::Insert));
    assert!(entries.iter().any(|e| e.kind == AuditKind::SagaCommit));
}

// -- Scenario 6: GROUP BY + ORDER BY determinism ---------------------------

async fn seeded_group_engine() -> Engine {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    for (i, name) in ["a", "b", "a", "a", "b"].iter().enumerate() {
        let id = HexadId::new(format!("ent-{i}"));
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("name".to_string(), Value::Str(name.to_string()));
        store
            .put(
                &id,
                ModalityPayload::Document {
                    title: name.to_string(),
                    body: String::new(),
                    fields,
                },
                1,
            )
            .await
            .unwrap();
    }
    engine_with_store(store).await
}

#[tokio::test]
async fn group_by_order_by_is_deterministic() {
    let engine = seeded_group_engine().await;
    let query = "SELECT DOCUMENT.name, COUNT(*) FROM STORE s GROUP BY DOCUMENT.name ORDER BY DOCUMENT.name ASC";

    let response = engine.execute(query).await.unwrap();
    assert_eq!(response.row_count, 2);
    assert_eq!(response.rows[0]["document.name"], Value::Str("a".to_string()));
    assert_eq!(response.rows[0]["COUNT(*)"], Value::Int(3));
    assert_eq!(response.rows[1]["document.name"], Value::Str("b".to_string()));
    assert_eq!(response.rows[1]["COUNT(*)"], Value::Int(2));

    // k_a + k_b = 5, and repeated execution yields identical rows.
    let again = engine.execute(query).await.unwrap();
    assert_eq!(response.rows, again.rows);
}

// -- Cache and mutation interplay ------------------------------------------

#[tokio::test]
async fn update_invalidates_cached_results() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let id = HexadId::new("ent-1");
    store
        .put(&id, doc_payload("Before", "b", Some(1)), 1)
        .await
        .unwrap();

    let engine = engine_with_store(store).await;
    let query = "SELECT DOCUMENT.title FROM HEXAD ent-1";

    let first = engine.execute(query).await.unwrap();
    assert_eq!(first.rows[0]["document.title"], Value::Str("Before".to_string()));

    // Second run serves from cache.
    let cached = engine.execute(query).await.unwrap();
    assert!(cached
        .notices
        .iter()
        .any(|n| n.message.contains("served from cache")));

    engine
        .execute("UPDATE HEXAD ent-1 SET DOCUMENT.title = \"After\"")
        .await
        .unwrap();

    let fresh = engine.execute(query).await.unwrap();
    assert_eq!(fresh.rows[0]["document.title"], Value::Str("After".to_string()));
}

#[tokio::test]
async fn delete_tombstones_and_hides_hexad() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let id = HexadId::new("ent-1");
    store.put(&id, doc_payload("X", "b", None), 1).await.unwrap();

    let engine = engine_with_store(store).await;
    engine.execute("DELETE HEXAD ent-1").await.unwrap();

    let response = engine
        .execute("SELECT DOCUMENT.title FROM HEXAD ent-1")
        .await
        .unwrap();
    assert_eq!(response.row_count, 0);

    let entries = engine.temporal_log().entries().await.unwrap();
    assert!(entries.iter().any(|e| e.kind == AuditKind::Tombstone));
}

#[tokio::test]
async fn operator_inspect_and_repair() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let id = HexadId::new("ent-1");
    store
        .put(&id, doc_payload("Title", "some text", None), 1)
        .await
        .unwrap();
    store
        .put(&id, vector_payload(vec![0.0, 0.0, 0.0, 1.0]), 1)
        .await
        .unwrap();

    let engine = engine_with_store(store.clone()).await;

    let hexad = engine.inspect_hexad(&id).await.unwrap().unwrap();
    assert!(hexad.has(Modality::Document));
    assert!(hexad.has(Modality::Vector));

    let outcome = engine
        .repair_drift(&id, Modality::Document, Modality::Vector)
        .await
        .unwrap();
    assert!(outcome.changed);

    // The store now holds the derived embedding, audited as a repair.
    let (payload, version) = store.get(&id, Modality::Vector).await.unwrap().unwrap();
    assert!(version > 1);
    let ModalityPayload::Vector { embedding, .. } = payload else { panic!() };
    assert_eq!(embedding.len(), 4);
    let entries = engine.temporal_log().entries().await.unwrap();
    assert!(entries.iter().any(|e| e.kind == AuditKind::Repair));
}

// -- Boundary behaviours ---------------------------------------------------

#[tokio::test]
async fn boundary_errors_map_to_exit_codes() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    let engine = engine_with_store(store).await;

    // Empty SELECT is a parse error (exit 1).
    let err = engine.execute("SELECT FROM HEXAD ent-1").await.unwrap_err();
    assert!(matches!(err, EngineError::Parse(_)));
    assert_eq!(err.exit_code(), 1);

    // HAVING without GROUP BY is a type error (exit 2).
    let err = engine
        .execute("SELECT DOCUMENT.name FROM STORE s HAVING COUNT(*) > 1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Type(_)));
    assert_eq!(err.exit_code(), 2);

    // Empty vector literal is a type error.
    let err = engine
        .execute("SELECT * FROM STORE s WHERE VECTOR SIMILAR TO [] WITHIN 0.5")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Type(_)));

    // Unknown store surfaces as a store error (exit 3).
    let err = engine
        .execute("SELECT DOCUMENT.title FROM STORE nowhere")
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn limit_zero_yields_empty_result_not_error() {
    let store = Arc::new(InMemoryModalityStore::full("s"));
    store
        .put(&HexadId::new("ent-1"), doc_payload("X", "b", None), 1)
        .await
        .unwrap();
    let engine = engine_with_store(store).await;

    let response: QueryResponse = engine
        .execute("SELECT DOCUMENT.title FROM STORE s LIMIT 0")
        .await
        .unwrap();
    assert_eq!(response.row_count, 0);
}
