//! Shared core types used across the registry, senders and fork layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a contract was deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentKind {
    /// A plain contract instance.
    Singleton,
    /// A proxy pointing at an implementation deployment.
    Proxy,
    /// A linked library.
    Library,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Singleton => write!(f, "SINGLETON"),
            DeploymentKind::Proxy => write!(f, "PROXY"),
            DeploymentKind::Library => write!(f, "LIBRARY"),
        }
    }
}

/// Transaction status. `Executed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Executed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Executed | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::Executed => write!(f, "EXECUTED"),
            TransactionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Multisig proposal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafeTransactionStatus {
    Queued,
    Executed,
}

/// Normalize a hex address for comparisons: lowercase with `0x` prefix.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_ascii_lowercase())
}

/// Whether `value` looks like a 20-byte hex address.
pub fn is_address(value: &str) -> bool {
    let Some(body) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) else {
        return false;
    };
    body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_compare_case_insensitively() {
        assert_eq!(
            normalize_address("0xABCDEFabcdef0000000000000000000000000001"),
            normalize_address("0xabcdefABCDEF0000000000000000000000000001")
        );
    }

    #[test]
    fn detects_addresses() {
        assert!(is_address("0x5FbDB2315678afecb367f032d93F642f64180aa3"));
        assert!(!is_address("Counter"));
        assert!(!is_address("0x1234"));
    }

    #[test]
    fn kinds_serialize_uppercase() {
        let json = serde_json::to_string(&DeploymentKind::Proxy).unwrap();
        assert_eq!(json, "\"PROXY\"");
    }
}
