// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the executor: determinism and repair
//! idempotence across generated data.

use proptest::prelude::*;
use std::sync::Arc;

use verisim_exec::Engine;
use verisim_model::{HexadBuilder, HexadId, Modality, ModalityPayload, Value};
use verisim_normalizer::Normalizer;
use verisim_store::{InMemoryModalityStore, ModalityStore};

fn arb_name() -> impl Strategy<Value = String> {
    "[a-c]{1}"
}

fn arb_rows() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec((arb_name(), -50i64..50), 1..12)
}

proptest! {
    /// Executing the same well-typed slipstream query twice over the same
    /// hexad set yields identical results.
    #[test]
    fn test_execution_is_deterministic(rows in arb_rows()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = Arc::new(InMemoryModalityStore::full("s"));
            for (i, (name, severity)) in rows.iter().enumerate() {
                let mut fields = std::collections::BTreeMap::new();
                fields.insert("name".to_string(), Value::Str(name.clone()));
                fields.insert("severity".to_string(), Value::Int(*severity));
                store
                    .put(
                        &HexadId::new(format!("ent-{i}")),
                        ModalityPayload::Document {
                            title: name.clone(),
                            body: String::new(),
                            fields,
                        },
                        1,
                    )
                    .await
                    .unwrap();
            }
            let engine = Engine::builder().store(store).build();
            let query = "SELECT DOCUMENT.name, COUNT(*) FROM STORE s GROUP BY DOCUMENT.name ORDER BY DOCUMENT.name ASC";

            let a = engine.execute(query).await.unwrap();
            let b = engine.execute(query).await.unwrap();
            prop_assert_eq!(&a.rows, &b.rows);

            // Group counts always sum to the row count.
            let total: i64 = a
                .rows
                .iter()
                .filter_map(|r| match r.get("COUNT(*)") {
                    Some(Value::Int(n)) => Some(*n),
                    _ => None,
                })
                .sum();
            prop_assert_eq!(total as usize, rows.len());
            Ok(())
        })?;
    }

    /// repair(repair(h)) == repair(h) for generated documents and stray
    /// embeddings.
    #[test]
    fn test_repair_idempotence(
        title in "[A-Za-z ]{1,20}",
        body in "[A-Za-z0-9 ]{0,60}",
        embedding in prop::collection::vec(-1.0f32..1.0, 1..8),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let normalizer = Normalizer::with_defaults();
            let mut hexad = HexadBuilder::new("ent-1")
                .with_document(&title, &body)
                .with_embedding(embedding)
                .build();

            normalizer
                .repair(&mut hexad, Modality::Document, Modality::Vector)
                .await
                .unwrap();
            let first_hash = hexad.content_hash(Modality::Vector).unwrap().to_string();

            let second = normalizer
                .repair(&mut hexad, Modality::Document, Modality::Vector)
                .await
                .unwrap();
            prop_assert!(!second.changed);
            prop_assert_eq!(
                hexad.content_hash(Modality::Vector).unwrap(),
                first_hash.as_str()
            );
            Ok(())
        })?;
    }
}
