// SPDX-License-Identifier: PMPL-1.0-or-later
//! The replicated metadata log.
//!
//! Entries are `(term, index, command, timestamp)` tuples, ordered by
//! (term, index). On disk the committed log is newline-delimited JSON, one
//! entry per line, fsynced before the entry is acknowledged as committed.
//! Truncation - follower log repair - is the only non-append operation and
//! is serialised through the Raft state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use verisim_model::{HexadId, HexadRegistry, Modality};

use crate::peer::{PeerRegistry, PeerStore};
use crate::FederationError;

/// Commands applied to the metadata state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataCommand {
    RegisterPeer { peer: PeerStore },
    UnregisterPeer { store_id: String },
    MapHexad {
        id: HexadId,
        modality: Modality,
        store_id: String,
    },
    UnmapHexad { id: HexadId, modality: Modality },
    UpdateTrust { store_id: String, trust: f64 },
    NoOp,
}

/// One replicated log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: MetadataCommand,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(term: u64, index: u64, command: MetadataCommand) -> Self {
        Self {
            term,
            index,
            command,
            timestamp: Utc::now(),
        }
    }
}

/// The metadata state machine: peer registry plus hexad-to-store map.
/// Committed entries are applied exactly once, in index order.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    pub peers: PeerRegistry,
    pub hexads: HexadRegistry,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed command.
    pub fn apply(&mut self, command: &MetadataCommand) {
        match command {
            MetadataCommand::RegisterPeer { peer } => self.peers.insert(peer.clone()),
            MetadataCommand::UnregisterPeer { store_id } => {
                self.peers.remove(store_id);
            }
            MetadataCommand::MapHexad { id, modality, store_id } => {
                self.hexads.map_hexad(id.clone(), *modality, store_id.clone());
            }
            MetadataCommand::UnmapHexad { id, modality } => {
                self.hexads.unmap_hexad(id, *modality);
            }
            MetadataCommand::UpdateTrust { store_id, trust } => {
                self.peers.set_trust(store_id, *trust);
            }
            MetadataCommand::NoOp => {}
        }
    }
}

/// Snapshot wire format: `{version: 1, nodeState, snapshotTimestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub node_state: SnapshotState,
    pub snapshot_timestamp: DateTime<Utc>,
}

/// Serializable node state inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub commit_index: u64,
    pub peers: Vec<PeerStore>,
    pub hexads: HexadRegistry,
}

/// Append-only NDJSON log file for committed entries.
pub struct MetadataLogFile {
    path: PathBuf,
    file: File,
}

impl MetadataLogFile {
    /// Open (or create) the log file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FederationError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| FederationError::Io(e.to_string()))?;
        Ok(Self { path, file })
    }

    /// Append a committed entry and fsync before returning - the entry is
    /// only acknowledged as committed once this call succeeds.
    pub fn append_committed(&mut self, entry: &LogEntry) -> Result<(), FederationError> {
        let mut line =
            serde_json::to_string(entry).map_err(|e| FederationError::Io(e.to_string()))?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .map_err(|e| FederationError::Io(e.to_string()))?;
        self.file
            .sync_data()
            .map_err(|e| FederationError::Io(e.to_string()))?;
        debug!(term = entry.term, index = entry.index, "entry persisted");
        Ok(())
    }

    /// Read every committed entry in file order.
    pub fn load(&mut self) -> Result<Vec<LogEntry>, FederationError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| FederationError::Io(e.to_string()))?;
        let reader = BufReader::new(&self.file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| FederationError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry =
                serde_json::from_str(&line).map_err(|e| FederationError::Io(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Truncate the persisted log from `index` onward (follower repair).
    /// Rewrites the file; callers serialise this through the state machine.
    pub fn truncate_from(&mut self, index: u64) -> Result<(), FederationError> {
        let entries = self.load()?;
        let kept: Vec<&LogEntry> = entries.iter().filter(|e| e.index < index).collect();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| FederationError::Io(e.to_string()))?;
        for entry in kept {
            let mut line =
                serde_json::to_string(entry).map_err(|e| FederationError::Io(e.to_string()))?;
            line.push('\n');
            file.write_all(line.as_bytes())
                .map_err(|e| FederationError::Io(e.to_string()))?;
        }
        file.sync_data()
            .map_err(|e| FederationError::Io(e.to_string()))?;

        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| FederationError::Io(e.to_string()))?;
        info!(from_index = index, "log truncated for repair");
        Ok(())
    }

    /// Save a snapshot alongside the log.
    pub fn save_snapshot(
        path: impl AsRef<Path>,
        snapshot: &Snapshot,
    ) -> Result<(), FederationError> {
        let json =
            serde_json::to_string_pretty(snapshot).map_err(|e| FederationError::Io(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| FederationError::Io(e.to_string()))
    }

    /// Load a snapshot.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Snapshot, FederationError> {
        let json = std::fs::read_to_string(path).map_err(|e| FederationError::Io(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| FederationError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(term: u64, index: u64) -> LogEntry {
        LogEntry::new(
            term,
            index,
            MetadataCommand::MapHexad {
                id: HexadId::new(format!("ent-{index}")),
                modality: Modality::Document,
                store_id: "store-1".to_string(),
            },
        )
    }

    #[test]
    fn test_ndjson_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.log");
        let mut log = MetadataLogFile::open(&path).unwrap();

        for i in 1..=3 {
            log.append_committed(&sample_entry(1, i)).unwrap();
        }

        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].index, 3);

        // Each line is standalone JSON with the wire-format fields.
        let raw = std::fs::read_to_string(&path).unwrap();
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["term"], 1);
        assert_eq!(first["index"], 1);
        assert_eq!(first["command"]["type"], "map_hexad");
        assert!(first["timestamp"].is_string());
    }

    #[test]
    fn test_truncate_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.log");
        let mut log = MetadataLogFile::open(&path).unwrap();
        for i in 1..=5 {
            log.append_committed(&sample_entry(1, i)).unwrap();
        }
        log.truncate_from(3).unwrap();
        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 2);

        // Appending still works after truncation.
        log.append_committed(&sample_entry(2, 3)).unwrap();
        assert_eq!(log.load().unwrap().len(), 3);
    }

    #[test]
    fn test_state_machine_apply() {
        let mut state = RegistryState::new();
        state.apply(&MetadataCommand::RegisterPeer {
            peer: PeerStore::new("p1", "http://p1", vec![Modality::Document]),
        });
        state.apply(&MetadataCommand::MapHexad {
            id: HexadId::new("ent-1"),
            modality: Modality::Document,
            store_id: "p1".to_string(),
        });
        state.apply(&MetadataCommand::UpdateTrust {
            store_id: "p1".to_string(),
            trust: 0.4,
        });

        assert_eq!(state.peers.len(), 1);
        assert_eq!(state.peers.get("p1").unwrap().trust, 0.4);
        assert_eq!(
            state.hexads.owning_store(&HexadId::new("ent-1"), Modality::Document),
            Some("p1")
        );

        state.apply(&MetadataCommand::UnregisterPeer {
            store_id: "p1".to_string(),
        });
        assert!(state.peers.is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let snapshot = Snapshot {
            version: 1,
            node_state: SnapshotState {
                current_term: 3,
                voted_for: Some("node-a".to_string()),
                commit_index: 17,
                peers: vec![PeerStore::new("p1", "http://p1", vec![])],
                hexads: HexadRegistry::new(),
            },
            snapshot_timestamp: Utc::now(),
        };
        MetadataLogFile::save_snapshot(&path, &snapshot).unwrap();
        let loaded = MetadataLogFile::load_snapshot(&path).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.node_state.current_term, 3);
        assert_eq!(loaded.node_state.peers.len(), 1);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("nodeState"));
        assert!(raw.contains("snapshotTimestamp"));
    }
}
