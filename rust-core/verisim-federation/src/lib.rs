// SPDX-License-Identifier: PMPL-1.0-or-later
//! VeriSim Federation Core
//!
//! A federation is a set of peer VeriSimDB instances coordinated through a
//! Raft-replicated metadata log. This crate holds the peer registry, the
//! on-disk NDJSON log, the Raft state machine, and the quorum fan-out that
//! answers `FEDERATION <glob>` sources under a drift policy.

use std::collections::HashMap;
use thiserror::Error;

mod fanout;
mod log;
mod peer;
mod raft;

pub use fanout::{
    flag_byzantine, AnnotatedRow, FanOutResult, FederatedQuery, FederationCoordinator,
    PeerQueryClient,
};
pub use log::{LogEntry, MetadataCommand, MetadataLogFile, RegistryState, Snapshot};
pub use peer::{pattern_matches, PeerRegistry, PeerStore};
pub use raft::{
    AppendEntries, AppendEntriesResponse, RaftConfig, RaftNode, RequestVote, RequestVoteResponse,
    Role,
};

/// Drift policy for federated queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Reject differing versions outright.
    Strict,
    /// Return results and hand drifted hexads to the normalizer.
    Repair,
    /// Return all versions, annotated.
    #[default]
    Tolerate,
    /// Return the highest temporal version across peers.
    Latest,
}

/// Federation errors
#[derive(Error, Debug, Clone)]
pub enum FederationError {
    #[error("Peer {0} unreachable")]
    Unreachable(String),

    #[error("Partial results: {succeeded} of {queried} peers answered")]
    PartialResults { succeeded: usize, queried: usize },

    #[error("Consensus timeout after {0:?}")]
    ConsensusTimeout(std::time::Duration),

    #[error("Byzantine behaviour suspected from {0}")]
    ByzantineSuspected(String),

    #[error("Not leader; try {leader_hint:?}")]
    NotLeader { leader_hint: Option<String> },

    #[error("Registration refused for {0}")]
    RegistrationRefused(String),

    #[error("Conflicting versions for hexad {0} under STRICT drift policy")]
    ConflictingVersions(String),

    #[error("Metadata log I/O error: {0}")]
    Io(String),
}

impl FederationError {
    pub fn code(&self) -> &'static str {
        match self {
            FederationError::Unreachable(_) => "federation/unreachable",
            FederationError::PartialResults { .. } => "federation/partial-results",
            FederationError::ConsensusTimeout(_) => "federation/consensus-timeout",
            FederationError::ByzantineSuspected(_) => "federation/byzantine-suspected",
            FederationError::NotLeader { .. } => "federation/not-leader",
            FederationError::RegistrationRefused(_) => "federation/registration-refused",
            FederationError::ConflictingVersions(_) => "federation/conflicting-versions",
            FederationError::Io(_) => "federation/io",
        }
    }

    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            FederationError::Unreachable(_)
                | FederationError::ConsensusTimeout(_)
                | FederationError::NotLeader { .. }
                | FederationError::PartialResults { .. }
        )
    }

    pub fn hint(&self) -> String {
        match self {
            FederationError::Unreachable(_) => "the peer's circuit breaker will probe after cool-down".to_string(),
            FederationError::PartialResults { .. } => "TOLERATE mode returns what a quorum supplied".to_string(),
            FederationError::ConsensusTimeout(_) => "a leader election may be in progress".to_string(),
            FederationError::ByzantineSuspected(_) => "confirm before proposing UnregisterPeer".to_string(),
            FederationError::NotLeader { leader_hint } => match leader_hint {
                Some(hint) => format!("resubmit to '{hint}'"),
                None => "resubmit once a leader is elected".to_string(),
            },
            FederationError::RegistrationRefused(_) => "registration requires a pre-shared key".to_string(),
            FederationError::ConflictingVersions(_) => "use REPAIR or LATEST to reconcile".to_string(),
            FederationError::Io(_) => "check the metadata log file".to_string(),
        }
    }
}

/// Environment-level federation controls.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Pre-shared keys authorising registration, keyed by store id.
    /// Empty table refuses all registration.
    pub psk_table: HashMap<String, String>,
    /// IPv4 acceptance toggle; the default bind is IPv6-only.
    pub accept_ipv4: bool,
    /// Minimum peer trust for fan-out inclusion.
    pub min_trust: f64,
    /// Per-peer fan-out deadline.
    pub fan_out_timeout: std::time::Duration,
    /// Upper bound on concurrent connections per peer, enforced by the
    /// transport layer.
    pub max_connections_per_peer: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            psk_table: HashMap::new(),
            accept_ipv4: false,
            min_trust: 0.5,
            fan_out_timeout: std::time::Duration::from_secs(5),
            max_connections_per_peer: 16,
        }
    }
}

impl FederationConfig {
    /// Authorise a registration attempt. Empty tables refuse everything.
    pub fn authorise(&self, store_id: &str, presented_key: &str) -> Result<(), FederationError> {
        match self.psk_table.get(store_id) {
            Some(key) if key == presented_key => Ok(()),
            _ => Err(FederationError::RegistrationRefused(store_id.to_string())),
        }
    }
}
