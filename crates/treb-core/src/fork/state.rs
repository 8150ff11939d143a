//! `fork-state.json`: active forks and their snapshot stacks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::document::{load_document, remove_document, write_document};

pub const FORK_STATE_FILE: &str = "fork-state.json";

/// Label of the base snapshot taken when a fork opens.
pub const ENTER_COMMAND: &str = "fork enter";
/// Label of the base snapshot taken when a fork is restarted.
pub const RESTART_COMMAND: &str = "fork restart";

/// One paired checkpoint: chain snapshot id plus registry backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub index: usize,
    pub command: String,
    pub snapshot_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// blake3 digest of the backed-up registry documents
    pub registry_digest: String,
    /// The node already consumed `snapshot_id`; it is retaken before the next push
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkEntry {
    pub network: String,
    pub chain_id: u64,
    /// Local URL of the fork node
    pub fork_url: String,
    /// Variable the upstream endpoint was read from
    pub env_var: String,
    pub port: u16,
    pub pid: u32,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotEntry>,
}

impl ForkEntry {
    pub fn base_snapshot(&self) -> Option<&SnapshotEntry> {
        self.snapshots.first()
    }

    pub fn top_snapshot(&self) -> Option<&SnapshotEntry> {
        self.snapshots.last()
    }

    /// Steps recorded on top of the base snapshot.
    pub fn depth(&self) -> usize {
        self.snapshots.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkState {
    #[serde(default)]
    pub forks: BTreeMap<String, ForkEntry>,
}

impl ForkState {
    pub fn get(&self, network: &str) -> Option<&ForkEntry> {
        self.forks.get(network)
    }

    pub fn get_mut(&mut self, network: &str) -> Option<&mut ForkEntry> {
        self.forks.get_mut(network)
    }

    pub fn is_active(&self, network: &str) -> bool {
        self.forks.contains_key(network)
    }

    /// Lowest port at or above `base` no other fork uses.
    pub fn next_port(&self, base: u16) -> u16 {
        let mut port = base;
        while self.forks.values().any(|entry| entry.port == port) {
            port = port.saturating_add(1);
        }
        port
    }
}

/// Loads and saves `fork-state.json`; the file exists only while a fork does.
#[derive(Debug, Clone)]
pub struct ForkStateStore {
    path: PathBuf,
}

impl ForkStateStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(FORK_STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ForkState> {
        Ok(load_document(&self.path)?)
    }

    pub fn save(&self, state: &ForkState) -> Result<()> {
        if state.forks.is_empty() {
            remove_document(&self.path)?;
        } else {
            write_document(&self.path, state)?;
        }
        Ok(())
    }
}
