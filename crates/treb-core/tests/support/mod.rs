//! In-memory stand-ins for the fork node, its RPC and the script runner.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use tempfile::TempDir;
use treb_core::config::TrebConfig;
use treb_core::context::AppContext;
use treb_core::fork::process::{NodeHandle, NodeSpec, NodeSupervisor};
use treb_core::fork::rpc::{ChainRpc, RpcConnector};
use treb_core::script::{
    BroadcastDeployment, BroadcastTransaction, ScriptInvocation, ScriptOutcome, ScriptRunner,
};
use treb_core::sender::SenderConfig;
use treb_core::types::{DeploymentKind, TransactionStatus};
use treb_core::{Error, Result};

pub const NETWORK: &str = "sepolia";
pub const CHAIN_ID: u64 = 11_155_111;
pub const DEPLOYER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const UPSTREAM_URL: &str = "https://sepolia.example.invalid";

#[derive(Default)]
struct NodeState {
    next_pid: u32,
    alive: BTreeSet<u32>,
    started: Vec<NodeSpec>,
    fail_start: bool,
}

/// Pretend node processes: a pid set plus a log file per start.
#[derive(Clone, Default)]
pub struct FakeNode {
    state: Rc<RefCell<NodeState>>,
}

impl FakeNode {
    pub fn crash(&self, pid: u32) {
        self.state.borrow_mut().alive.remove(&pid);
    }

    pub fn alive(&self) -> BTreeSet<u32> {
        self.state.borrow().alive.clone()
    }

    pub fn starts(&self) -> Vec<NodeSpec> {
        self.state.borrow().started.clone()
    }

    pub fn fail_next_start(&self) {
        self.state.borrow_mut().fail_start = true;
    }
}

impl NodeSupervisor for FakeNode {
    fn start(&self, spec: &NodeSpec) -> Result<NodeHandle> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_start) {
            return Err(anyhow::anyhow!("node refused to start").into());
        }
        state.next_pid += 1;
        let pid = 40_000 + state.next_pid;
        std::fs::write(
            &spec.log_file,
            format!("Forking {}\nListening on 127.0.0.1:{}\n", spec.upstream_url, spec.port),
        )
        .map_err(anyhow::Error::from)?;
        std::fs::write(&spec.pid_file, pid.to_string()).map_err(anyhow::Error::from)?;
        state.alive.insert(pid);
        state.started.push(spec.clone());
        Ok(NodeHandle { pid })
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.state.borrow().alive.contains(&pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        self.state.borrow_mut().alive.remove(&pid);
        Ok(())
    }
}

#[derive(Default)]
struct ChainState {
    next_snapshot: u64,
    /// Snapshot ids still valid, oldest first
    live_snapshots: Vec<String>,
    reverts: Vec<String>,
    code: BTreeMap<String, String>,
    fail_snapshot: bool,
}

/// One shared chain behind every URL, with node-like snapshot semantics:
/// reverting to an id drops it and every later one.
#[derive(Clone, Default)]
pub struct FakeChain {
    state: Rc<RefCell<ChainState>>,
}

impl FakeChain {
    pub fn set_code(&self, address: &str, code: &str) {
        self.state
            .borrow_mut()
            .code
            .insert(address.to_ascii_lowercase(), code.to_string());
    }

    pub fn reverts(&self) -> Vec<String> {
        self.state.borrow().reverts.clone()
    }

    pub fn live_snapshots(&self) -> Vec<String> {
        self.state.borrow().live_snapshots.clone()
    }

    pub fn fail_next_snapshot(&self) {
        self.state.borrow_mut().fail_snapshot = true;
    }
}

impl RpcConnector for FakeChain {
    fn connect(&self, _url: &str) -> Result<Box<dyn ChainRpc>> {
        Ok(Box::new(self.clone()))
    }
}

impl ChainRpc for FakeChain {
    fn chain_id(&self) -> Result<u64> {
        Ok(CHAIN_ID)
    }

    fn snapshot(&self) -> Result<String> {
        let mut state = self.state.borrow_mut();
        if std::mem::take(&mut state.fail_snapshot) {
            return Err(anyhow::anyhow!("connection reset by peer").into());
        }
        state.next_snapshot += 1;
        let id = format!("0x{:x}", state.next_snapshot);
        state.live_snapshots.push(id.clone());
        Ok(id)
    }

    fn revert(&self, snapshot_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let Some(position) = state.live_snapshots.iter().position(|id| id == snapshot_id) else {
            return Err(anyhow::anyhow!("unknown snapshot {snapshot_id}").into());
        };
        state.live_snapshots.truncate(position);
        state.reverts.push(snapshot_id.to_string());
        Ok(())
    }

    fn get_code(&self, address: &str) -> Result<String> {
        Ok(self
            .state
            .borrow()
            .code
            .get(&address.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| "0x".to_string()))
    }

    fn get_balance(&self, _address: &str) -> Result<u128> {
        Ok(10_000 * 1_000_000_000_000_000_000)
    }
}

/// Replays queued outcomes; an empty queue yields an empty outcome.
#[derive(Clone, Default)]
pub struct FakeRunner {
    queue: Rc<RefCell<VecDeque<std::result::Result<ScriptOutcome, String>>>>,
    invocations: Rc<RefCell<Vec<ScriptInvocation>>>,
}

impl FakeRunner {
    pub fn push(&self, outcome: ScriptOutcome) {
        self.queue.borrow_mut().push_back(Ok(outcome));
    }

    pub fn push_failure(&self, message: &str) {
        self.queue.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn invocations(&self) -> Vec<ScriptInvocation> {
        self.invocations.borrow().clone()
    }
}

impl ScriptRunner for FakeRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutcome> {
        self.invocations.borrow_mut().push(invocation.clone());
        match self.queue.borrow_mut().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(Error::Other(anyhow::anyhow!(message))),
            None => Ok(ScriptOutcome::default()),
        }
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub node: FakeNode,
    pub chain: FakeChain,
    pub runner: FakeRunner,
    pub ctx: AppContext,
}

impl Harness {
    /// A project whose `sepolia` endpoint reads `rpc_var`. Each test passes
    /// its own variable name since tests share the process environment.
    pub fn new(rpc_var: &str) -> Self {
        Self::with_config(rpc_var, |_| {})
    }

    pub fn with_config(rpc_var: &str, tweak: impl FnOnce(&mut TrebConfig)) -> Self {
        // SAFETY: every test uses a distinct variable name.
        unsafe { std::env::set_var(rpc_var, UPSTREAM_URL) };

        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();

        let mut config = TrebConfig::new();
        config
            .networks
            .insert(NETWORK.to_string(), format!("${{{rpc_var}}}"));
        config.senders.insert(
            "default".to_string(),
            SenderConfig::PrivateKey {
                address: DEPLOYER.to_string(),
            },
        );
        tweak(&mut config);

        let node = FakeNode::default();
        let chain = FakeChain::default();
        let runner = FakeRunner::default();
        let ctx = AppContext::with_collaborators(
            project,
            config,
            Box::new(node.clone()),
            Box::new(chain.clone()),
            Box::new(runner.clone()),
        );
        Self {
            temp,
            node,
            chain,
            runner,
            ctx,
        }
    }

    pub fn state_dir(&self) -> std::path::PathBuf {
        self.ctx.state_dir()
    }

    pub fn fork_dir(&self) -> std::path::PathBuf {
        treb_core::fork::fork_dir(&self.state_dir(), NETWORK)
    }
}

/// A mined transaction creating one singleton per `(name, address)`.
pub fn deploy_tx(hash: &str, nonce: u64, contracts: &[(&str, &str)]) -> BroadcastTransaction {
    BroadcastTransaction {
        hash: hash.to_string(),
        status: TransactionStatus::Executed,
        block_number: Some(100 + nonce),
        sender: DEPLOYER.to_string(),
        nonce,
        deployments: contracts
            .iter()
            .map(|(name, address)| BroadcastDeployment {
                contract_name: name.to_string(),
                label: String::new(),
                address: address.to_string(),
                kind: DeploymentKind::Singleton,
                implementation: None,
                salt: None,
                tags: Vec::new(),
            })
            .collect(),
        safe_proposal: None,
    }
}

pub fn outcome(transactions: Vec<BroadcastTransaction>) -> ScriptOutcome {
    ScriptOutcome { transactions }
}
