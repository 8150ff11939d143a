//! Application context for dependency injection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ConfigStore, RpcEndpoint, TrebConfig};
use crate::error::{Error, Result};
use crate::fork::process::{AnvilSupervisor, NodeSupervisor};
use crate::fork::rpc::{HttpRpcConnector, RpcConnector};
use crate::fork::state::ForkStateStore;
use crate::fork::{ForkSessionManager, SnapshotSynchronizer};
use crate::registry::{RegistryStore, STATE_DIR_NAME};
use crate::script::{ForgeScriptRunner, ScriptRunner};

/// Shared services and paths for one project.
///
/// Frontends create this once and pass it to commands by reference. Tests
/// build it with [`AppContext::with_collaborators`] to swap the node, RPC
/// and script seams for fakes.
pub struct AppContext {
    project_root: PathBuf,
    config: TrebConfig,
    supervisor: Box<dyn NodeSupervisor>,
    connector: Box<dyn RpcConnector>,
    runner: Box<dyn ScriptRunner>,
}

impl AppContext {
    /// Load `treb.toml` from `project_root` and wire the real collaborators.
    pub fn load(project_root: PathBuf) -> Result<Self> {
        let config = ConfigStore::for_project(&project_root).load()?;
        config.validate()?;
        let supervisor = Box::new(AnvilSupervisor::new(&config.fork));
        let connector = Box::new(HttpRpcConnector::new(Duration::from_secs(
            config.fork.rpc_timeout_secs,
        )));
        let runner = Box::new(ForgeScriptRunner::new(&config.script));
        Ok(Self::with_collaborators(
            project_root,
            config,
            supervisor,
            connector,
            runner,
        ))
    }

    pub fn with_collaborators(
        project_root: PathBuf,
        config: TrebConfig,
        supervisor: Box<dyn NodeSupervisor>,
        connector: Box<dyn RpcConnector>,
        runner: Box<dyn ScriptRunner>,
    ) -> Self {
        Self {
            project_root,
            config,
            supervisor,
            connector,
            runner,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &TrebConfig {
        &self.config
    }

    /// `<project>/.treb`
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR_NAME)
    }

    pub fn registry(&self) -> RegistryStore {
        RegistryStore::new(self.state_dir())
    }

    pub fn fork_state(&self) -> ForkStateStore {
        ForkStateStore::new(&self.state_dir())
    }

    pub fn supervisor(&self) -> &dyn NodeSupervisor {
        self.supervisor.as_ref()
    }

    pub fn connector(&self) -> &dyn RpcConnector {
        self.connector.as_ref()
    }

    pub fn runner(&self) -> &dyn ScriptRunner {
        self.runner.as_ref()
    }

    pub fn fork_sessions(&self) -> ForkSessionManager<'_> {
        ForkSessionManager::new(self)
    }

    pub fn snapshots(&self) -> SnapshotSynchronizer<'_> {
        SnapshotSynchronizer::new(self)
    }

    /// RPC URL for `network`: the fork's while one is active, otherwise the
    /// configured endpoint. A fork whose node died is an error, never a
    /// silent fallback to the upstream network.
    pub fn rpc_url(&self, network: &str) -> Result<String> {
        if let Some(entry) = self.fork_state().load()?.get(network) {
            if !self.supervisor().is_alive(entry.pid) {
                return Err(Error::ForkCrashed {
                    network: network.to_string(),
                    pid: entry.pid,
                });
            }
            return Ok(entry.fork_url.clone());
        }
        self.config.endpoint(network)?.resolve()
    }

    /// The configured endpoint, ignoring any fork.
    pub fn upstream_endpoint(&self, network: &str) -> Result<RpcEndpoint> {
        self.config.endpoint(network)
    }
}
