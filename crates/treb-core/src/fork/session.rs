//! Fork lifecycle: enter, exit, restart, status, history.
//!
//! A fork is `Inactive` until `enter` records its entry in
//! `fork-state.json`. While active it is `Healthy` or `Dead` depending on
//! whether its node process is still running. `exit` and `restart` both
//! work on a dead fork and both begin by restoring the registry to the
//! state captured at snapshot 0. `force_exit` leaves the registry as is when
//! that restore fails, so a fork with a damaged base can still be torn down.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backup::{backup_registry, restore_registry};
use super::process::NodeSpec;
use super::state::{ENTER_COMMAND, ForkEntry, ForkState, RESTART_COMMAND, SnapshotEntry};
use super::{fork_dir, snapshot_dir, validate_network_name};
use crate::config::RpcEndpoint;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::registry::{Deployment, RegistryStore, Transaction};
use crate::sender::SenderConfig;

const PID_FILE: &str = "anvil.pid";
const LOG_FILE: &str = "anvil.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkHealth {
    Healthy,
    Dead,
}

impl std::fmt::Display for ForkHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForkHealth::Healthy => write!(f, "healthy"),
            ForkHealth::Dead => write!(f, "dead"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SenderBalance {
    pub name: String,
    pub address: String,
    /// Wei
    pub balance: u128,
}

/// Result of `enter` or `restart`.
#[derive(Debug, Clone, Serialize)]
pub struct EnterReport {
    pub network: String,
    pub chain_id: u64,
    pub fork_url: String,
    pub env_var: String,
    pub port: u16,
    pub pid: u32,
    pub balances: Vec<SenderBalance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExitReport {
    pub network: String,
    /// Steps undone by restoring snapshot 0
    pub discarded_steps: usize,
    /// Whether the node was still running
    pub was_alive: bool,
    /// False when a forced exit could not restore snapshot 0
    pub registry_restored: bool,
    /// Non-fork records written since the fork was entered, lost by the restore
    pub discarded_live: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForkStatus {
    pub network: String,
    pub chain_id: u64,
    pub fork_url: String,
    pub port: u16,
    pub pid: u32,
    pub health: ForkHealth,
    pub snapshots: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Registry records added since the fork was entered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ForkDiff {
    pub network: String,
    pub deployments: Vec<Deployment>,
    pub transactions: Vec<Transaction>,
    pub safe_transactions: Vec<String>,
}

impl ForkDiff {
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
            && self.transactions.is_empty()
            && self.safe_transactions.is_empty()
    }
}

pub struct ForkSessionManager<'a> {
    ctx: &'a AppContext,
}

impl<'a> ForkSessionManager<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    fn load_entry(&self, network: &str) -> Result<(ForkState, ForkEntry)> {
        let state = self.ctx.fork_state().load()?;
        let entry = state
            .get(network)
            .cloned()
            .ok_or_else(|| Error::NoActiveFork(network.to_string()))?;
        Ok((state, entry))
    }

    /// Start a fork of `network`.
    pub fn enter(&self, network: &str) -> Result<EnterReport> {
        validate_network_name(network)?;
        let mut state = self.ctx.fork_state().load()?;
        if state.is_active(network) {
            return Err(Error::ForkAlreadyActive(network.to_string()));
        }

        let port = state.next_port(self.ctx.config().fork.port_base);
        let entry = self.launch(network, port, ENTER_COMMAND)?;
        let report = self.report(&entry);

        state.forks.insert(network.to_string(), entry);
        self.ctx.fork_state().save(&state)?;
        info!(network, port = report.port, pid = report.pid, "entered fork");
        Ok(report)
    }

    /// Leave a fork: registry back to snapshot 0, node stopped, files gone.
    pub fn exit(&self, network: &str) -> Result<ExitReport> {
        self.leave(network, false)
    }

    /// Like `exit`, but a registry that cannot be restored is left as is
    /// instead of keeping the fork alive.
    pub fn force_exit(&self, network: &str) -> Result<ExitReport> {
        self.leave(network, true)
    }

    fn leave(&self, network: &str, force: bool) -> Result<ExitReport> {
        let (mut state, entry) = self.load_entry(network)?;
        let discarded_live = match self.live_records_since_base(&entry) {
            Ok(ids) => ids,
            Err(err) if force => {
                warn!(network, error = %err, "cannot read fork base");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let registry_restored = match self.restore_base(&entry) {
            Ok(()) => true,
            Err(err) if force => {
                warn!(network, error = %err, "registry not restored; forcing exit");
                false
            }
            Err(err) => return Err(err),
        };

        let was_alive = self.ctx.supervisor().is_alive(entry.pid);
        if was_alive {
            self.ctx.supervisor().terminate(entry.pid)?;
        } else {
            warn!(network, pid = entry.pid, "fork node was already dead");
        }

        self.remove_fork_dir(network)?;
        state.forks.remove(network);
        self.ctx.fork_state().save(&state)?;
        info!(network, registry_restored, "exited fork");

        Ok(ExitReport {
            network: network.to_string(),
            discarded_steps: entry.depth(),
            was_alive,
            registry_restored,
            discarded_live,
        })
    }

    /// Replace a fork with a fresh node, keeping its port.
    ///
    /// A restart whose setup fails leaves the fork exited.
    pub fn restart(&self, network: &str) -> Result<EnterReport> {
        let (mut state, entry) = self.load_entry(network)?;
        self.live_records_since_base(&entry)?;
        self.restore_base(&entry)?;

        if self.ctx.supervisor().is_alive(entry.pid) {
            self.ctx.supervisor().terminate(entry.pid)?;
        }
        self.remove_fork_dir(network)?;
        state.forks.remove(network);

        match self.launch(network, entry.port, RESTART_COMMAND) {
            Ok(fresh) => {
                let report = self.report(&fresh);
                state.forks.insert(network.to_string(), fresh);
                self.ctx.fork_state().save(&state)?;
                info!(network, pid = report.pid, "restarted fork");
                Ok(report)
            }
            Err(err) => {
                self.ctx.fork_state().save(&state)?;
                Err(err)
            }
        }
    }

    /// Every active fork with its health. Never mutates state.
    pub fn status(&self) -> Result<Vec<ForkStatus>> {
        let state = self.ctx.fork_state().load()?;
        Ok(state
            .forks
            .values()
            .map(|entry| ForkStatus {
                network: entry.network.clone(),
                chain_id: entry.chain_id,
                fork_url: entry.fork_url.clone(),
                port: entry.port,
                pid: entry.pid,
                health: self.health(entry),
                snapshots: entry.snapshots.len(),
                started_at: entry.started_at,
            })
            .collect())
    }

    pub fn health(&self, entry: &ForkEntry) -> ForkHealth {
        if self.ctx.supervisor().is_alive(entry.pid) {
            ForkHealth::Healthy
        } else {
            ForkHealth::Dead
        }
    }

    /// Snapshot stack, oldest first.
    pub fn history(&self, network: &str) -> Result<Vec<SnapshotEntry>> {
        let (_, entry) = self.load_entry(network)?;
        Ok(entry.snapshots)
    }

    /// Records present now that were absent at snapshot 0.
    pub fn diff(&self, network: &str) -> Result<ForkDiff> {
        let (_, entry) = self.load_entry(network)?;
        let base_dir = snapshot_dir(&self.ctx.state_dir(), network, 0);
        let base = RegistryStore::new(base_dir).load()?;
        let current = self.ctx.registry().load()?;
        debug!(network, snapshots = entry.snapshots.len(), "computing fork diff");

        Ok(ForkDiff {
            network: network.to_string(),
            deployments: current
                .deployments
                .values()
                .filter(|d| !base.deployments.contains_key(&d.id))
                .cloned()
                .collect(),
            transactions: current
                .transactions
                .values()
                .filter(|tx| !base.transactions.contains_key(&tx.id))
                .cloned()
                .collect(),
            safe_transactions: current
                .safe_transactions
                .keys()
                .filter(|hash| !base.safe_transactions.contains_key(*hash))
                .cloned()
                .collect(),
        })
    }

    /// Tail of the node log.
    pub fn logs(&self, network: &str, lines: usize) -> Result<Vec<String>> {
        let (_, entry) = self.load_entry(network)?;
        self.ctx.supervisor().read_logs(&entry.log_file, lines)
    }

    /// Start a node, run setup and take snapshot 0. Any failure stops the
    /// node and removes everything created for it.
    fn launch(&self, network: &str, port: u16, command: &str) -> Result<ForkEntry> {
        let env_var = match self.ctx.upstream_endpoint(network)? {
            RpcEndpoint::EnvVar(var) => var,
            RpcEndpoint::Literal(_) => {
                return Err(Error::InvalidConfig(format!(
                    "network '{network}' must use an environment variable endpoint (${{VAR}}) to be forked"
                )));
            }
        };
        let upstream_url = RpcEndpoint::EnvVar(env_var.clone()).resolve()?;

        let state_dir = self.ctx.state_dir();
        let dir = fork_dir(&state_dir, network);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create fork directory: {}", dir.display()))?;
        let spec = NodeSpec {
            network: network.to_string(),
            upstream_url,
            port,
            log_file: dir.join(LOG_FILE),
            pid_file: dir.join(PID_FILE),
        };

        let handle = match self.ctx.supervisor().start(&spec) {
            Ok(handle) => handle,
            Err(err) => {
                self.discard(network, None);
                return Err(err);
            }
        };

        match self.prepare(network, &spec, handle.pid, &env_var, command) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.discard(network, Some(handle.pid));
                Err(err)
            }
        }
    }

    fn prepare(
        &self,
        network: &str,
        spec: &NodeSpec,
        pid: u32,
        env_var: &str,
        command: &str,
    ) -> Result<ForkEntry> {
        let fork_url = format!("http://127.0.0.1:{}", spec.port);
        let rpc = self.ctx.connector().connect(&fork_url)?;
        let chain_id = rpc.chain_id()?;

        if let Some(setup) = &self.ctx.config().fork.setup {
            let invocation = crate::script::ScriptInvocation {
                project_root: self.ctx.project_root().to_path_buf(),
                script: setup.clone(),
                network: network.to_string(),
                rpc_url: fork_url.clone(),
                chain_id,
                namespace: self.ctx.config().namespace.clone(),
                env: [(env_var.to_string(), fork_url.clone())].into(),
            };
            self.ctx
                .runner()
                .run(&invocation)
                .map_err(|err| Error::SetupFailed {
                    network: network.to_string(),
                    reason: err.to_string(),
                })?;
            debug!(network, script = %setup, "setup script finished");
        }

        let snapshot_id = rpc.snapshot()?;
        let state_dir = self.ctx.state_dir();
        let registry_digest =
            backup_registry(&state_dir, &snapshot_dir(&state_dir, network, 0))?;
        debug!(network, %snapshot_id, "took base snapshot");

        Ok(ForkEntry {
            network: network.to_string(),
            chain_id,
            fork_url,
            env_var: env_var.to_string(),
            port: spec.port,
            pid,
            pid_file: spec.pid_file.clone(),
            log_file: spec.log_file.clone(),
            started_at: chrono::Utc::now(),
            snapshots: vec![SnapshotEntry {
                index: 0,
                command: command.to_string(),
                snapshot_id,
                created_at: chrono::Utc::now(),
                registry_digest,
                stale: false,
            }],
        })
    }

    /// Best-effort teardown of a fork that never became active.
    fn discard(&self, network: &str, pid: Option<u32>) {
        if let Some(pid) = pid
            && let Err(err) = self.ctx.supervisor().terminate(pid)
        {
            warn!(network, pid, error = %err, "failed to stop fork node");
        }
        if let Err(err) = self.remove_fork_dir(network) {
            warn!(network, error = %err, "failed to remove fork directory");
        }
    }

    /// Ids of deployments and transactions added since snapshot 0 that were
    /// not recorded against a fork. Restoring the base drops them too.
    fn live_records_since_base(&self, entry: &ForkEntry) -> Result<Vec<String>> {
        if entry.base_snapshot().is_none() {
            return Ok(Vec::new());
        }
        let base_dir = snapshot_dir(&self.ctx.state_dir(), &entry.network, 0);
        let base = RegistryStore::new(base_dir).load()?;
        let current = self.ctx.registry().load()?;

        let deployments = current
            .deployments
            .values()
            .filter(|d| !d.fork && !base.deployments.contains_key(&d.id))
            .map(|d| d.id.clone());
        let transactions = current
            .transactions
            .values()
            .filter(|tx| !tx.fork && !base.transactions.contains_key(&tx.id))
            .map(|tx| tx.id.clone());
        let ids: Vec<String> = deployments.chain(transactions).collect();
        if !ids.is_empty() {
            warn!(
                network = %entry.network,
                records = ?ids,
                "restoring the fork base discards records written to live networks"
            );
        }
        Ok(ids)
    }

    fn restore_base(&self, entry: &ForkEntry) -> Result<()> {
        let Some(base) = entry.base_snapshot() else {
            warn!(network = %entry.network, "fork has no base snapshot; registry left as is");
            return Ok(());
        };
        let state_dir = self.ctx.state_dir();
        restore_registry(
            &state_dir,
            &snapshot_dir(&state_dir, &entry.network, 0),
            &base.registry_digest,
        )
    }

    fn remove_fork_dir(&self, network: &str) -> Result<()> {
        let dir = fork_dir(&self.ctx.state_dir(), network);
        remove_dir_if_exists(&dir)
    }

    fn report(&self, entry: &ForkEntry) -> EnterReport {
        EnterReport {
            network: entry.network.clone(),
            chain_id: entry.chain_id,
            fork_url: entry.fork_url.clone(),
            env_var: entry.env_var.clone(),
            port: entry.port,
            pid: entry.pid,
            balances: self.sender_balances(&entry.fork_url),
        }
    }

    /// Balances of private-key senders on the fork; unreachable ones are skipped.
    fn sender_balances(&self, fork_url: &str) -> Vec<SenderBalance> {
        let rpc = match self.ctx.connector().connect(fork_url) {
            Ok(rpc) => rpc,
            Err(err) => {
                warn!(error = %err, "cannot query sender balances");
                return Vec::new();
            }
        };
        self.ctx
            .config()
            .senders
            .iter()
            .filter(|(_, sender)| matches!(sender, SenderConfig::PrivateKey { .. }))
            .filter_map(|(name, sender)| {
                let address = sender.address();
                match rpc.get_balance(&address) {
                    Ok(balance) => Some(SenderBalance {
                        name: name.clone(),
                        address,
                        balance,
                    }),
                    Err(err) => {
                        warn!(sender = %name, error = %err, "balance lookup failed");
                        None
                    }
                }
            })
            .collect()
    }
}

pub(crate) fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("Failed to remove directory: {}", dir.display()))
            .into()),
    }
}
