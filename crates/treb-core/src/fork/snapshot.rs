//! Snapshot stack: push before each mutating step, pop on revert.
//!
//! Every entry pairs a chain snapshot id with a registry backup taken at the
//! same moment. Index 0 is the fork's base and is never popped.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::backup::{backup_registry, digest_documents, restore_registry};
use super::session::remove_dir_if_exists;
use super::state::{ForkEntry, ForkState, SnapshotEntry};
use super::snapshot_dir;
use crate::context::AppContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct RevertReport {
    pub network: String,
    /// Entries undone, most recent first
    pub reverted: Vec<SnapshotEntry>,
    /// Stack length afterwards
    pub remaining: usize,
}

impl RevertReport {
    pub fn count(&self) -> usize {
        self.reverted.len()
    }
}

pub struct SnapshotSynchronizer<'a> {
    ctx: &'a AppContext,
}

impl<'a> SnapshotSynchronizer<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Load the fork for `network`, failing if it is missing or its node died.
    pub fn ensure_alive(&self, network: &str) -> Result<(ForkState, ForkEntry)> {
        let state = self.ctx.fork_state().load()?;
        let entry = state
            .get(network)
            .cloned()
            .ok_or_else(|| Error::NoActiveFork(network.to_string()))?;
        if !self.ctx.supervisor().is_alive(entry.pid) {
            return Err(Error::ForkCrashed {
                network: network.to_string(),
                pid: entry.pid,
            });
        }
        Ok((state, entry))
    }

    /// Checkpoint chain and registry before a step labelled `command`.
    pub fn push(&self, network: &str, command: &str) -> Result<SnapshotEntry> {
        let (mut state, mut entry) = self.ensure_alive(network)?;
        let rpc = self.ctx.connector().connect(&entry.fork_url)?;

        if let Some(base) = entry.snapshots.first_mut()
            && base.stale
        {
            base.snapshot_id = rpc.snapshot()?;
            base.stale = false;
            debug!(network, id = %base.snapshot_id, "renewed stale base snapshot");
        }

        let index = entry.snapshots.len();
        let snapshot_id = rpc.snapshot()?;
        let state_dir = self.ctx.state_dir();
        let registry_digest =
            backup_registry(&state_dir, &snapshot_dir(&state_dir, network, index))?;

        let snapshot = SnapshotEntry {
            index,
            command: command.to_string(),
            snapshot_id,
            created_at: chrono::Utc::now(),
            registry_digest,
            stale: false,
        };
        entry.snapshots.push(snapshot.clone());
        state.forks.insert(network.to_string(), entry);
        self.ctx.fork_state().save(&state)?;
        debug!(network, index, id = %snapshot.snapshot_id, "pushed snapshot");
        Ok(snapshot)
    }

    /// Undo the most recent step.
    pub fn revert(&self, network: &str) -> Result<RevertReport> {
        let (mut state, mut entry) = self.ensure_alive(network)?;
        if entry.snapshots.len() <= 1 {
            return Err(Error::NothingToRevert(network.to_string()));
        }
        let Some(top) = entry.snapshots.pop() else {
            return Err(Error::NothingToRevert(network.to_string()));
        };

        // Once the node has reverted, the stack must shrink with it.
        self.rewind(&entry, &top)?;
        let remaining = entry.snapshots.len();
        state.forks.insert(network.to_string(), entry);
        self.ctx.fork_state().save(&state)?;
        info!(network, index = top.index, command = %top.command, "reverted snapshot");

        self.remove_backup(network, top.index);
        Ok(RevertReport {
            network: network.to_string(),
            reverted: vec![top],
            remaining,
        })
    }

    /// Undo every step back to the base snapshot.
    ///
    /// The node invalidates a snapshot id once reverted to, so the base entry
    /// gets a fresh id afterwards. If taking it fails the base is left marked
    /// stale and renewed by the next push.
    pub fn revert_all(&self, network: &str) -> Result<RevertReport> {
        let (mut state, mut entry) = self.ensure_alive(network)?;
        if entry.snapshots.len() <= 1 {
            return Err(Error::NothingToRevert(network.to_string()));
        }
        let Some(base) = entry.snapshots.first().cloned() else {
            return Err(Error::NothingToRevert(network.to_string()));
        };

        self.rewind(&entry, &base)?;
        let mut reverted = entry.snapshots.split_off(1);
        reverted.reverse();
        if let Some(base) = entry.snapshots.first_mut() {
            base.stale = true;
        }
        let fork_url = entry.fork_url.clone();
        state.forks.insert(network.to_string(), entry);
        self.ctx.fork_state().save(&state)?;
        info!(network, count = reverted.len(), "reverted all snapshots");
        for undone in &reverted {
            self.remove_backup(network, undone.index);
        }

        let fresh_id = self
            .ctx
            .connector()
            .connect(&fork_url)
            .and_then(|rpc| rpc.snapshot())
            .map_err(|err| {
                anyhow::anyhow!(
                    "Reverted '{network}' to its base but could not renew the base snapshot: {err}"
                )
            })?;
        if let Some(base) = state
            .get_mut(network)
            .and_then(|entry| entry.snapshots.first_mut())
        {
            debug!(network, old = %base.snapshot_id, new = %fresh_id, "renewed base snapshot");
            base.snapshot_id = fresh_id;
            base.stale = false;
        }
        self.ctx.fork_state().save(&state)?;

        Ok(RevertReport {
            network: network.to_string(),
            reverted,
            remaining: 1,
        })
    }

    /// Backups of undone steps are unreachable once the stack is saved.
    fn remove_backup(&self, network: &str, index: usize) {
        let dir = snapshot_dir(&self.ctx.state_dir(), network, index);
        if let Err(err) = remove_dir_if_exists(&dir) {
            warn!(network, index, error = %err, "failed to remove snapshot backup");
        }
    }

    /// Revert chain and registry to `target`. The backup is verified before
    /// the chain is touched.
    fn rewind(&self, entry: &ForkEntry, target: &SnapshotEntry) -> Result<()> {
        let state_dir = self.ctx.state_dir();
        let backup = snapshot_dir(&state_dir, &entry.network, target.index);
        let digest = digest_documents(&backup)?;
        if digest != target.registry_digest {
            return Err(anyhow::anyhow!(
                "Snapshot {} of '{}' has a corrupt registry backup",
                target.index,
                entry.network
            )
            .into());
        }

        let rpc = self.ctx.connector().connect(&entry.fork_url)?;
        rpc.revert(&target.snapshot_id)?;
        restore_registry(&state_dir, &backup, &target.registry_digest)
    }
}
