// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Executor
//!
//! Takes a checked VQL statement and runs it: classifies the WHERE clause
//! into pushdown and cross-modal parts, routes to stores or federated
//! peers, assembles rows by hexad id, evaluates cross-modal predicates,
//! applies GROUP BY / aggregation / ORDER BY / pagination, and drives the
//! mutation saga. The [`Engine`] facade wires every core component with an
//! explicit lifecycle - tests spin fresh instances.

use std::time::Duration;
use thiserror::Error;

mod classify;
mod engine;
mod executor;
mod saga;

pub use classify::{classify, Classified};
pub use engine::{Engine, EngineBuilder, ExplainReport, FederationHandle, QueryResponse};
pub use executor::{assemble_rows, evaluate_condition, post_process, EvalContext, OutRow, Row};
pub use saga::{Saga, SagaOutcome};

use verisim_cache::CacheError;
use verisim_federation::FederationError;
use verisim_model::ModelError;
use verisim_normalizer::NormalizerError;
use verisim_proof::ProofError;
use verisim_store::StoreError;
use verisim_vql::{ParseError, TypeError};

/// Engine-level errors: the full taxonomy, each kind keeping its own code,
/// hint, and recoverability.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Normalizer(#[from] NormalizerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Query exceeded its {0:?} wall-clock deadline")]
    QueryTimeout(Duration),

    #[error("Hexad {0} is quarantined pending operator review")]
    Quarantined(String),

    #[error("Unknown store: {0}")]
    UnknownStore(String),

    #[error("Internal invariant broken: {0}")]
    Internal(String),
}

impl EngineError {
    /// Machine-readable code, slash-prefixed by taxonomy kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Parse(e) => e.code(),
            EngineError::Type(e) => e.code(),
            EngineError::Proof(e) => e.code(),
            EngineError::Store(e) => e.code(),
            EngineError::Federation(e) => e.code(),
            EngineError::Model(e) => e.code(),
            EngineError::Normalizer(e) => e.code(),
            EngineError::Cache(_) => "internal/cache",
            EngineError::QueryTimeout(_) => "store/query-timeout",
            EngineError::Quarantined(_) => "store/quarantined",
            EngineError::UnknownStore(_) => "store/unknown-store",
            EngineError::Internal(_) => "internal/invariant",
        }
    }

    /// Whether a retry can plausibly succeed. Proof failures are always
    /// fatal to the query.
    pub fn recoverable(&self) -> bool {
        match self {
            EngineError::Parse(e) => e.recoverable(),
            EngineError::Type(e) => e.recoverable(),
            EngineError::Proof(e) => e.recoverable(),
            EngineError::Store(e) => e.recoverable(),
            EngineError::Federation(e) => e.recoverable(),
            EngineError::Model(e) => e.recoverable(),
            EngineError::Normalizer(e) => e.recoverable(),
            EngineError::Cache(_) => false,
            EngineError::QueryTimeout(_) => true,
            EngineError::Quarantined(_) => false,
            EngineError::UnknownStore(_) => false,
            EngineError::Internal(_) => false,
        }
    }

    /// Process exit code for CLI front-ends.
    pub fn exit_code(&self) -> i32 {
        verisim_model::exit_code(Some(self.code()))
    }
}

/// Per-call deadlines and engine tuning. All overridable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store_read_timeout: Duration,
    pub store_write_timeout: Duration,
    pub fan_out_timeout: Duration,
    pub proof_timeout: Duration,
    pub query_timeout: Duration,
    /// Freshness bound handed to Freshness obligations.
    pub freshness_max_age_secs: i64,
    /// Cache policy for slipstream results.
    pub slipstream_cache: verisim_cache::CachePolicy,
    /// Cache policy for dependent-type results.
    pub proof_cache: verisim_cache::CachePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_read_timeout: Duration::from_secs(1),
            store_write_timeout: Duration::from_secs(5),
            fan_out_timeout: Duration::from_secs(5),
            proof_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            freshness_max_age_secs: 3600,
            slipstream_cache: verisim_cache::CachePolicy::aggressive(),
            proof_cache: verisim_cache::CachePolicy::strict(),
        }
    }
}
