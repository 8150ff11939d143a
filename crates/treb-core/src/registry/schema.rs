//! Registry record types.
//!
//! Each record type lives in its own JSON document keyed by its identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{DeploymentKind, SafeTransactionStatus, TransactionStatus, normalize_address};

/// A deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// `namespace/chainId/contractName[:label]`
    pub id: String,
    pub namespace: String,
    pub chain_id: u64,
    pub contract_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: DeploymentKind,
    pub transaction_id: String,

    /// Implementation deployment id for proxies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Recorded while a fork was active for the network
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fork: bool,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Deployment {
    /// Build a deployment record with its identity derived from the parts.
    pub fn new(
        namespace: impl Into<String>,
        chain_id: u64,
        contract_name: impl Into<String>,
        label: impl Into<String>,
        address: &str,
        kind: DeploymentKind,
        transaction_id: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let contract_name = contract_name.into();
        let label = label.into();
        Self {
            id: deployment_id(&namespace, chain_id, &contract_name, &label),
            namespace,
            chain_id,
            contract_name,
            label,
            address: normalize_address(address),
            kind,
            transaction_id: transaction_id.into(),
            implementation: None,
            salt: None,
            script: None,
            tags: BTreeSet::new(),
            fork: false,
            created_at: chrono::Utc::now(),
        }
    }

    /// `Name` or `Name:label`.
    pub fn short_name(&self) -> String {
        if self.label.is_empty() {
            self.contract_name.clone()
        } else {
            format!("{}:{}", self.contract_name, self.label)
        }
    }
}

/// Identity key for a deployment.
pub fn deployment_id(namespace: &str, chain_id: u64, contract_name: &str, label: &str) -> String {
    if label.is_empty() {
        format!("{namespace}/{chain_id}/{contract_name}")
    } else {
        format!("{namespace}/{chain_id}/{contract_name}:{label}")
    }
}

/// A broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// `tx-<hash>`
    pub id: String,
    pub chain_id: u64,
    pub hash: String,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub sender: String,
    pub nonce: u64,
    #[serde(default)]
    pub deployments: Vec<String>,

    /// Multisig proposal this transaction waits on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_transaction: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fork: bool,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Transaction {
    pub fn new(chain_id: u64, hash: &str, sender: &str, nonce: u64) -> Self {
        let hash = hash.to_ascii_lowercase();
        Self {
            id: transaction_id(&hash),
            chain_id,
            hash,
            status: TransactionStatus::Pending,
            block_number: None,
            sender: normalize_address(sender),
            nonce,
            deployments: Vec::new(),
            safe_transaction: None,
            fork: false,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn executed_at(mut self, block_number: u64) -> Self {
        self.status = TransactionStatus::Executed;
        self.block_number = Some(block_number);
        self
    }
}

/// Identity key for a transaction hash.
pub fn transaction_id(hash: &str) -> String {
    format!("tx-{}", hash.to_ascii_lowercase())
}

/// A multisig proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransaction {
    pub safe_tx_hash: String,
    pub safe_address: String,
    pub chain_id: u64,
    pub status: SafeTransactionStatus,
    pub nonce: u64,
    pub transaction_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fork: bool,
    pub proposed_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SafeTransaction {
    pub fn new(safe_tx_hash: &str, safe_address: &str, chain_id: u64, nonce: u64) -> Self {
        Self {
            safe_tx_hash: safe_tx_hash.to_ascii_lowercase(),
            safe_address: normalize_address(safe_address),
            chain_id,
            status: SafeTransactionStatus::Queued,
            nonce,
            transaction_ids: Vec::new(),
            proposed_by: None,
            execution_tx_hash: None,
            fork: false,
            proposed_at: chrono::Utc::now(),
            executed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_includes_label_only_when_present() {
        assert_eq!(deployment_id("default", 1, "Counter", ""), "default/1/Counter");
        assert_eq!(
            deployment_id("staging", 11155111, "Counter", "v2"),
            "staging/11155111/Counter:v2"
        );
    }

    #[test]
    fn deployment_serializes_kind_as_type() {
        let deployment = Deployment::new(
            "default",
            31337,
            "Counter",
            "",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            DeploymentKind::Singleton,
            "tx-0xabc",
        );
        let value = serde_json::to_value(&deployment).unwrap();
        assert_eq!(value["type"], "SINGLETON");
        assert_eq!(value["address"], "0x5fbdb2315678afecb367f032d93f642f64180aa3");
        assert!(value.get("fork").is_none());
        assert!(value.get("label").is_none());
    }
}
