//! treb core library
//!
//! Deployment orchestration for smart-contract systems: dependency-ordered
//! execution plans, a registry of what was deployed where, and disposable
//! forks whose chain snapshots stay paired with registry backups.

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod fork;
pub mod graph;
pub mod orchestration;
pub mod registry;
pub mod script;
pub mod sender;
pub mod types;

pub use error::{Error, ErrorKind, Result};

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, ForkSettings, RpcEndpoint, ScriptSettings, TrebConfig};
    pub use crate::context::AppContext;

    // Planning
    pub use crate::graph::{ComponentConfig, ExecutionStep, OrchestrationConfig};

    // Registry
    pub use crate::registry::{
        Deployment, DeploymentFilter, Disambiguator, LookupScope, Registry, RegistryStore,
        SafeTransaction, Transaction,
    };
    pub use crate::types::{DeploymentKind, SafeTransactionStatus, TransactionStatus};

    // Forks
    pub use crate::fork::process::{AnvilSupervisor, NodeHandle, NodeSpec, NodeSupervisor};
    pub use crate::fork::rpc::{ChainRpc, HttpRpcConnector, RpcConnector};
    pub use crate::fork::{ForkHealth, ForkSessionManager, SnapshotSynchronizer};

    // Scripts and senders
    pub use crate::script::{ForgeScriptRunner, ScriptInvocation, ScriptOutcome, ScriptRunner};
    pub use crate::sender::{Sender, SenderConfig};

    pub use crate::error::{Error, ErrorKind, Result};
}
