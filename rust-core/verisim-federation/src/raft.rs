// SPDX-License-Identifier: PMPL-1.0-or-later
//! Raft consensus over the metadata log.
//!
//! A standard single-threaded Raft state machine: each node owns its state
//! and is driven by an inbound message queue plus timer ticks. RPC handlers
//! here are pure state transitions; the surrounding runtime (or a test)
//! delivers messages and ticks. Outbound RPCs are produced as values and
//! sent fire-and-forget, with replies handled asynchronously.
//!
//! Log indices are 1-based. The commit index advances only to entries from
//! the current term, which closes the classic Raft commitment corner case.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::log::{LogEntry, MetadataCommand, MetadataLogFile, RegistryState};
use crate::FederationError;

/// Node roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// RequestVote RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVote {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// RequestVote response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestVoteResponse {
    pub term: u64,
    pub granted: bool,
}

/// AppendEntries RPC. Empty `entries` is the heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntries {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

/// AppendEntries response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    pub match_index: u64,
}

/// Raft timing configuration (in ticks).
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Ticks without leader contact before a follower starts an election.
    pub election_timeout_ticks: u32,
    /// Ticks between leader heartbeats.
    pub heartbeat_interval_ticks: u32,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_ticks: 10,
            heartbeat_interval_ticks: 3,
        }
    }
}

/// One Raft node.
pub struct RaftNode {
    pub id: String,
    /// The other cluster members.
    pub peers: Vec<String>,
    config: RaftConfig,

    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    log: Vec<LogEntry>,
    commit_index: u64,
    last_applied: u64,

    next_index: HashMap<String, u64>,
    match_index: HashMap<String, u64>,
    votes_received: HashSet<String>,

    /// Last leader this node heard from - the NotLeader hint.
    leader_hint: Option<String>,
    ticks_since_leader_contact: u32,
    ticks_since_heartbeat: u32,

    state_machine: RegistryState,
    /// Optional durable committed-entry log.
    storage: Option<MetadataLogFile>,
}

impl RaftNode {
    pub fn new(id: impl Into<String>, peers: Vec<String>, config: RaftConfig) -> Self {
        Self {
            id: id.into(),
            peers,
            config,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            votes_received: HashSet::new(),
            leader_hint: None,
            ticks_since_leader_contact: 0,
            ticks_since_heartbeat: 0,
            state_machine: RegistryState::new(),
            storage: None,
        }
    }

    /// Attach a durable log; committed entries are appended (fsynced) as
    /// they are applied.
    pub fn with_storage(mut self, storage: MetadataLogFile) -> Self {
        self.storage = Some(storage);
        self
    }

    // -- accessors ---------------------------------------------------------

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn state(&self) -> &RegistryState {
        &self.state_machine
    }

    pub fn leader_hint(&self) -> Option<&str> {
        self.leader_hint.as_deref()
    }

    fn last_log_index(&self) -> u64 {
        self.log.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    fn entry_term(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.log.get(index as usize - 1).map(|e| e.term)
    }

    fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    // -- timers ------------------------------------------------------------

    /// Advance the node's clock by one tick. Returns RPCs to send.
    pub fn tick(&mut self) -> Vec<(String, OutboundRpc)> {
        match self.role {
            Role::Leader => {
                self.ticks_since_heartbeat += 1;
                if self.ticks_since_heartbeat >= self.config.heartbeat_interval_ticks {
                    self.ticks_since_heartbeat = 0;
                    return self.broadcast_append_entries();
                }
                Vec::new()
            }
            Role::Follower | Role::Candidate => {
                self.ticks_since_leader_contact += 1;
                if self.ticks_since_leader_contact >= self.config.election_timeout_ticks {
                    return self.start_election();
                }
                Vec::new()
            }
        }
    }

    /// Begin a new election: bump term, vote for self, solicit votes.
    pub fn start_election(&mut self) -> Vec<(String, OutboundRpc)> {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id.clone());
        self.votes_received = HashSet::from([self.id.clone()]);
        self.ticks_since_leader_contact = 0;
        info!(node = %self.id, term = self.current_term, "election started");

        // A single-node cluster is its own majority.
        if self.votes_received.len() >= self.majority() {
            return self.become_leader();
        }

        let request = RequestVote {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };
        self.peers
            .iter()
            .map(|p| (p.clone(), OutboundRpc::Vote(request.clone())))
            .collect()
    }

    // -- RequestVote -------------------------------------------------------

    /// Handle an incoming RequestVote.
    pub fn handle_request_vote(&mut self, request: &RequestVote) -> RequestVoteResponse {
        if request.term > self.current_term {
            self.step_down(request.term);
        }

        let log_up_to_date = (request.last_log_term, request.last_log_index)
            >= (self.last_log_term(), self.last_log_index());
        let granted = request.term >= self.current_term
            && self
                .voted_for
                .as_ref()
                .map(|v| v == &request.candidate_id)
                .unwrap_or(true)
            && log_up_to_date;

        if granted {
            self.voted_for = Some(request.candidate_id.clone());
            self.ticks_since_leader_contact = 0;
        }
        debug!(node = %self.id, candidate = %request.candidate_id, granted, "vote handled");
        RequestVoteResponse {
            term: self.current_term,
            granted,
        }
    }

    /// Handle a vote response; may promote to leader.
    pub fn handle_vote_response(
        &mut self,
        from: &str,
        response: &RequestVoteResponse,
    ) -> Vec<(String, OutboundRpc)> {
        if response.term > self.current_term {
            self.step_down(response.term);
            return Vec::new();
        }
        if self.role != Role::Candidate || response.term < self.current_term || !response.granted {
            return Vec::new();
        }
        self.votes_received.insert(from.to_string());
        if self.votes_received.len() >= self.majority() {
            self.become_leader()
        } else {
            Vec::new()
        }
    }

    fn become_leader(&mut self) -> Vec<(String, OutboundRpc)> {
        info!(node = %self.id, term = self.current_term, "became leader");
        self.role = Role::Leader;
        self.leader_hint = Some(self.id.clone());
        let next = self.last_log_index() + 1;
        for peer in &self.peers {
            self.next_index.insert(peer.clone(), next);
            self.match_index.insert(peer.clone(), 0);
        }
        self.ticks_since_heartbeat = 0;
        self.broadcast_append_entries()
    }

    // -- AppendEntries -----------------------------------------------------

    /// Build the AppendEntries RPC for one peer from its next index.
    pub fn append_entries_for(&self, peer: &str) -> AppendEntries {
        let next = self.next_index.get(peer).copied().unwrap_or(1);
        let prev_log_index = next.saturating_sub(1);
        let prev_log_term = self.entry_term(prev_log_index).unwrap_or(0);
        let entries = self
            .log
            .iter()
            .filter(|e| e.index >= next)
            .cloned()
            .collect();
        AppendEntries {
            term: self.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
        }
    }

    fn broadcast_append_entries(&self) -> Vec<(String, OutboundRpc)> {
        self.peers
            .iter()
            .map(|p| (p.clone(), OutboundRpc::Append(self.append_entries_for(p))))
            .collect()
    }

    /// Handle an incoming AppendEntries: success iff the term is current and
    /// the previous entry matches; conflicts truncate, then entries append.
    pub fn handle_append_entries(&mut self, request: &AppendEntries) -> AppendEntriesResponse {
        if request.term < self.current_term {
            return AppendEntriesResponse {
                term: self.current_term,
                success: false,
                match_index: 0,
            };
        }

        if request.term > self.current_term || self.role != Role::Follower {
            self.step_down(request.term);
        }
        self.ticks_since_leader_contact = 0;
        self.leader_hint = Some(request.leader_id.clone());

        // Previous entry must match.
        let prev_ok = self.entry_term(request.prev_log_index) == Some(request.prev_log_term);
        if !prev_ok {
            debug!(node = %self.id, prev = request.prev_log_index, "append rejected: log mismatch");
            return AppendEntriesResponse {
                term: self.current_term,
                success: false,
                match_index: 0,
            };
        }

        // Resolve conflicts by truncating, then append.
        for entry in &request.entries {
            match self.entry_term(entry.index) {
                Some(term) if term == entry.term => {}
                Some(_) => {
                    warn!(node = %self.id, index = entry.index, "conflict - truncating");
                    self.log.truncate(entry.index as usize - 1);
                    self.log.push(entry.clone());
                }
                None => self.log.push(entry.clone()),
            }
        }

        if request.leader_commit > self.commit_index {
            self.commit_index = request.leader_commit.min(self.last_log_index());
            self.apply_committed();
        }

        AppendEntriesResponse {
            term: self.current_term,
            success: true,
            match_index: request.prev_log_index + request.entries.len() as u64,
        }
    }

    /// Handle an append response: advance match/next or back off and retry.
    pub fn handle_append_response(
        &mut self,
        from: &str,
        response: &AppendEntriesResponse,
    ) -> Vec<(String, OutboundRpc)> {
        if response.term > self.current_term {
            self.step_down(response.term);
            return Vec::new();
        }
        if self.role != Role::Leader {
            return Vec::new();
        }

        if response.success {
            self.match_index.insert(from.to_string(), response.match_index);
            self.next_index.insert(from.to_string(), response.match_index + 1);
            self.advance_commit_index();
            Vec::new()
        } else {
            // Back off one step and retry immediately.
            let next = self.next_index.entry(from.to_string()).or_insert(1);
            *next = next.saturating_sub(1).max(1);
            vec![(from.to_string(), OutboundRpc::Append(self.append_entries_for(from)))]
        }
    }

    /// Advance the commit index to the highest majority-stored entry of the
    /// current term.
    fn advance_commit_index(&mut self) {
        for index in (self.commit_index + 1..=self.last_log_index()).rev() {
            // Only entries from the current term commit by counting.
            if self.entry_term(index) != Some(self.current_term) {
                continue;
            }
            let stored = 1 + self
                .match_index
                .values()
                .filter(|m| **m >= index)
                .count();
            if stored >= self.majority() {
                self.commit_index = index;
                self.apply_committed();
                break;
            }
        }
    }

    /// Apply committed entries in order, exactly once.
    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let entry = self.log[self.last_applied as usize - 1].clone();
            self.state_machine.apply(&entry.command);
            if let Some(storage) = self.storage.as_mut() {
                if let Err(err) = storage.append_committed(&entry) {
                    warn!(node = %self.id, %err, "failed to persist committed entry");
                }
            }
            debug!(node = %self.id, index = entry.index, "applied");
        }
    }

    fn step_down(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
        self.votes_received.clear();
        self.ticks_since_leader_contact = 0;
    }

    // -- client ------------------------------------------------------------

    /// Submit a client proposal. Only the leader accepts; followers answer
    /// NotLeader with the last known leader as a hint.
    pub fn submit(
        &mut self,
        command: MetadataCommand,
    ) -> Result<(u64, u64, Vec<(String, OutboundRpc)>), FederationError> {
        if self.role != Role::Leader {
            return Err(FederationError::NotLeader {
                leader_hint: self.leader_hint.clone(),
            });
        }
        let index = self.last_log_index() + 1;
        let entry = LogEntry::new(self.current_term, index, command);
        self.log.push(entry);
        // Single-node clusters commit immediately.
        self.advance_commit_index();
        Ok((self.current_term, index, self.broadcast_append_entries()))
    }
}

/// An RPC produced by a state transition, to be delivered by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRpc {
    Vote(RequestVote),
    Append(AppendEntries),
}
