// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Store Interfaces
//!
//! The uniform capability set every modality store exposes to the engine,
//! plus the reference in-memory implementation, the temporal audit log, the
//! per-store circuit breaker, and the shared retry policy. The real backing
//! engines (RDF triple store, HNSW index, inverted text index, temporal log
//! storage) live outside the core and implement [`ModalityStore`].

use thiserror::Error;

mod breaker;
mod memory;
mod predicate;
mod retry;
mod store;
mod temporal_log;

pub use breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker};
pub use memory::InMemoryModalityStore;
pub use predicate::{FieldPredicate, StorePredicate};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use store::{ModalityStore, ScanRow};
pub use temporal_log::{AuditEntry, AuditKind, InMemoryTemporalLog, TemporalLog};

/// Store errors. `put` fails with `NotLeader` or `Conflict`; any operation
/// may surface `Unavailable` or `Timeout` once the circuit opens.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Not leader for {store_id}; try {leader_hint:?}")]
    NotLeader {
        store_id: String,
        leader_hint: Option<String>,
    },

    #[error("Write conflict on {id} ({modality}): store at version {current}, write at {proposed}")]
    Conflict {
        id: String,
        modality: verisim_model::Modality,
        current: u64,
        proposed: u64,
    },

    #[error("Store {0} unavailable")]
    Unavailable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Modality {modality} not served by store {store_id}")]
    ModalityNotServed {
        store_id: String,
        modality: verisim_model::Modality,
    },

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotLeader { .. } => "federation/not-leader",
            StoreError::Conflict { .. } => "store/conflict",
            StoreError::Unavailable(_) => "store/unavailable",
            StoreError::Timeout(_) => "store/timeout",
            StoreError::ModalityNotServed { .. } => "store/modality-not-served",
            StoreError::Internal(_) => "internal/store",
        }
    }

    /// Whether a retry can plausibly succeed.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Conflict { .. }
        )
    }

    /// One-line hint for user-facing output.
    pub fn hint(&self) -> String {
        match self {
            StoreError::NotLeader { leader_hint, .. } => match leader_hint {
                Some(hint) => format!("resubmit to the leader at '{hint}'"),
                None => "resubmit once a leader is elected".to_string(),
            },
            StoreError::Conflict { .. } => "re-read the current version and retry".to_string(),
            StoreError::Unavailable(_) => "the circuit breaker will probe again after cool-down".to_string(),
            StoreError::Timeout(_) => "raise the per-call deadline or reduce the scan size".to_string(),
            StoreError::ModalityNotServed { .. } => "check the registry mapping for this hexad".to_string(),
            StoreError::Internal(_) => "inspect the store logs".to_string(),
        }
    }
}
