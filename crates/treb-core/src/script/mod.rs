//! Script execution seam.
//!
//! A [`ScriptRunner`] broadcasts one deployment script against an RPC URL
//! and reports the transactions and deployments it produced. The real
//! runner shells out to `forge`; tests substitute their own.

pub mod forge;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{DeploymentKind, TransactionStatus};

pub use forge::ForgeScriptRunner;

/// Everything a runner needs to broadcast one script.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub project_root: PathBuf,
    pub script: String,
    pub network: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub namespace: String,
    pub env: BTreeMap<String, String>,
}

impl ScriptInvocation {
    /// Variables exported to the script process.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("NAMESPACE".to_string(), self.namespace.clone());
        env.insert("NETWORK".to_string(), self.network.clone());
        env.insert("CHAIN_ID".to_string(), self.chain_id.to_string());
        env.extend(self.env.clone());
        env
    }
}

/// What a broadcast produced, as reported by the script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOutcome {
    #[serde(default)]
    pub transactions: Vec<BroadcastTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTransaction {
    pub hash: String,
    #[serde(default = "default_status")]
    pub status: TransactionStatus,
    #[serde(default)]
    pub block_number: Option<u64>,
    pub sender: String,
    pub nonce: u64,
    #[serde(default)]
    pub deployments: Vec<BroadcastDeployment>,
    #[serde(default)]
    pub safe_proposal: Option<SafeProposal>,
}

fn default_status() -> TransactionStatus {
    TransactionStatus::Executed
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastDeployment {
    pub contract_name: String,
    #[serde(default)]
    pub label: String,
    pub address: String,
    #[serde(default = "default_kind", rename = "type")]
    pub kind: DeploymentKind,
    /// Short name (`Name[:label]`) of the implementation, for proxies
    #[serde(default)]
    pub implementation: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_kind() -> DeploymentKind {
    DeploymentKind::Singleton
}

/// A multisig proposal made instead of a direct broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeProposal {
    pub safe_tx_hash: String,
    pub safe_address: String,
    pub nonce: u64,
    #[serde(default)]
    pub proposed_by: Option<String>,
}

pub trait ScriptRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_defaults_fill_in() {
        let outcome: ScriptOutcome = serde_json::from_str(
            r#"{
                "transactions": [{
                    "hash": "0xabc",
                    "blockNumber": 12,
                    "sender": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
                    "nonce": 0,
                    "deployments": [{
                        "contractName": "Counter",
                        "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                    }]
                }]
            }"#,
        )
        .unwrap();

        let tx = &outcome.transactions[0];
        assert_eq!(tx.status, TransactionStatus::Executed);
        assert_eq!(tx.deployments[0].kind, DeploymentKind::Singleton);
        assert!(tx.deployments[0].label.is_empty());
        assert!(tx.safe_proposal.is_none());
    }

    #[test]
    fn step_env_overrides_defaults() {
        let mut env = BTreeMap::new();
        env.insert("NAMESPACE".to_string(), "override".to_string());
        env.insert("VAULT_CAP".to_string(), "1000".to_string());
        let invocation = ScriptInvocation {
            project_root: PathBuf::from("."),
            script: "script/Deploy.s.sol".to_string(),
            network: "sepolia".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 11155111,
            namespace: "default".to_string(),
            env,
        };

        let env = invocation.environment();
        assert_eq!(env["NAMESPACE"], "override");
        assert_eq!(env["NETWORK"], "sepolia");
        assert_eq!(env["CHAIN_ID"], "11155111");
        assert_eq!(env["VAULT_CAP"], "1000");
    }
}
