//! Senders: who signs and how a broadcast settles.
//!
//! A private key broadcasts directly, so transactions settle as the script
//! reported them. A Safe proposes instead; its transactions stay `PENDING`
//! until the proposal executes. A governor proposal likewise stays pending.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::SafeTransaction;
use crate::script::BroadcastTransaction;
use crate::types::{TransactionStatus, is_address, normalize_address};

/// A sender as declared under `[senders.<name>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SenderConfig {
    PrivateKey {
        address: String,
    },
    Safe {
        safe: String,
        /// Name of the sender that signs proposals
        signer: String,
    },
    Governor {
        governor: String,
        /// Name of the sender that submits proposals
        proposer: String,
    },
}

impl SenderConfig {
    /// Address transactions from this sender appear to come from.
    pub fn address(&self) -> String {
        match self {
            SenderConfig::PrivateKey { address } => normalize_address(address),
            SenderConfig::Safe { safe, .. } => normalize_address(safe),
            SenderConfig::Governor { governor, .. } => normalize_address(governor),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SenderConfig::PrivateKey { .. } => "private_key",
            SenderConfig::Safe { .. } => "safe",
            SenderConfig::Governor { .. } => "governor",
        }
    }

    pub fn validate(&self, name: &str, senders: &BTreeMap<String, SenderConfig>) -> Result<()> {
        let check_address = |field: &str, value: &str| {
            if is_address(value) {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "sender '{name}' has an invalid {field} address '{value}'"
                )))
            }
        };
        let check_signer = |field: &str, signer: &str| match senders.get(signer) {
            Some(SenderConfig::PrivateKey { .. }) => Ok(()),
            Some(_) => Err(Error::InvalidConfig(format!(
                "sender '{name}' uses {field} '{signer}', which is not a private_key sender"
            ))),
            None => Err(Error::InvalidConfig(format!(
                "sender '{name}' references unknown {field} '{signer}'"
            ))),
        };

        match self {
            SenderConfig::PrivateKey { address } => check_address("private key", address),
            SenderConfig::Safe { safe, signer } => {
                check_address("safe", safe)?;
                check_signer("signer", signer)
            }
            SenderConfig::Governor { governor, proposer } => {
                check_address("governor", governor)?;
                check_signer("proposer", proposer)
            }
        }
    }

    pub fn sender(&self) -> Box<dyn Sender> {
        match self {
            SenderConfig::PrivateKey { .. } => Box::new(PrivateKeySender),
            SenderConfig::Safe { safe, .. } => Box::new(SafeSender {
                safe: normalize_address(safe),
            }),
            SenderConfig::Governor { .. } => Box::new(GovernorSender),
        }
    }
}

/// Find the configured sender broadcasting from `address`.
pub fn sender_for_address<'a>(
    senders: &'a BTreeMap<String, SenderConfig>,
    address: &str,
) -> Option<(&'a str, &'a SenderConfig)> {
    let address = normalize_address(address);
    senders
        .iter()
        .find(|(_, config)| config.address() == address)
        .map(|(name, config)| (name.as_str(), config))
}

/// How one broadcast transaction lands in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub status: TransactionStatus,
    pub block_number: Option<u64>,
    pub safe_transaction: Option<SafeTransaction>,
}

pub trait Sender {
    fn settle(&self, broadcast: &BroadcastTransaction, chain_id: u64) -> Result<Settlement>;
}

/// Broadcasts directly.
#[derive(Debug, Clone, Copy)]
pub struct PrivateKeySender;

impl Sender for PrivateKeySender {
    fn settle(&self, broadcast: &BroadcastTransaction, _chain_id: u64) -> Result<Settlement> {
        if broadcast.status == TransactionStatus::Executed && broadcast.block_number.is_none() {
            return Err(Error::InvalidRecord(format!(
                "executed transaction {} has no block number",
                broadcast.hash
            )));
        }
        Ok(Settlement {
            status: broadcast.status,
            block_number: broadcast.block_number,
            safe_transaction: None,
        })
    }
}

/// Proposes to a multisig.
#[derive(Debug, Clone)]
pub struct SafeSender {
    safe: String,
}

impl Sender for SafeSender {
    fn settle(&self, broadcast: &BroadcastTransaction, chain_id: u64) -> Result<Settlement> {
        let Some(proposal) = &broadcast.safe_proposal else {
            return Err(Error::InvalidRecord(format!(
                "transaction {} from safe {} carries no proposal",
                broadcast.hash, self.safe
            )));
        };
        if normalize_address(&proposal.safe_address) != self.safe {
            return Err(Error::InvalidRecord(format!(
                "proposal {} targets safe {}, expected {}",
                proposal.safe_tx_hash, proposal.safe_address, self.safe
            )));
        }

        let mut safe = SafeTransaction::new(
            &proposal.safe_tx_hash,
            &proposal.safe_address,
            chain_id,
            proposal.nonce,
        );
        safe.proposed_by = proposal.proposed_by.as_deref().map(normalize_address);
        safe.transaction_ids
            .push(crate::registry::transaction_id(&broadcast.hash));

        Ok(Settlement {
            status: TransactionStatus::Pending,
            block_number: None,
            safe_transaction: Some(safe),
        })
    }
}

/// Submits a governance proposal.
#[derive(Debug, Clone, Copy)]
pub struct GovernorSender;

impl Sender for GovernorSender {
    fn settle(&self, _broadcast: &BroadcastTransaction, _chain_id: u64) -> Result<Settlement> {
        Ok(Settlement {
            status: TransactionStatus::Pending,
            block_number: None,
            safe_transaction: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::SafeProposal;

    const DEPLOYER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const SAFE: &str = "0x1111111111111111111111111111111111111111";

    fn senders() -> BTreeMap<String, SenderConfig> {
        let mut senders = BTreeMap::new();
        senders.insert(
            "deployer".to_string(),
            SenderConfig::PrivateKey {
                address: DEPLOYER.to_string(),
            },
        );
        senders.insert(
            "ops".to_string(),
            SenderConfig::Safe {
                safe: SAFE.to_string(),
                signer: "deployer".to_string(),
            },
        );
        senders
    }

    fn broadcast(sender: &str) -> BroadcastTransaction {
        BroadcastTransaction {
            hash: "0xAB".to_string(),
            status: TransactionStatus::Executed,
            block_number: Some(5),
            sender: sender.to_string(),
            nonce: 0,
            deployments: vec![],
            safe_proposal: None,
        }
    }

    #[test]
    fn safe_signer_must_be_a_private_key() {
        let mut senders = senders();
        senders.insert(
            "nested".to_string(),
            SenderConfig::Safe {
                safe: SAFE.to_string(),
                signer: "ops".to_string(),
            },
        );
        let err = senders["nested"].validate("nested", &senders).unwrap_err();
        assert!(err.to_string().contains("not a private_key sender"));
        senders["ops"].validate("ops", &senders).unwrap();
    }

    #[test]
    fn finds_sender_by_address() {
        let senders = senders();
        let (name, config) = sender_for_address(&senders, &SAFE.to_uppercase().replace("0X", "0x"))
            .unwrap();
        assert_eq!(name, "ops");
        assert_eq!(config.kind(), "safe");
        assert!(sender_for_address(&senders, "0x2222222222222222222222222222222222222222").is_none());
    }

    #[test]
    fn private_key_settles_as_reported() {
        let settlement = senders()["deployer"]
            .sender()
            .settle(&broadcast(DEPLOYER), 1)
            .unwrap();
        assert_eq!(settlement.status, TransactionStatus::Executed);
        assert_eq!(settlement.block_number, Some(5));
    }

    #[test]
    fn safe_settles_pending_with_proposal() {
        let mut tx = broadcast(SAFE);
        tx.safe_proposal = Some(SafeProposal {
            safe_tx_hash: "0xFEED".to_string(),
            safe_address: SAFE.to_string(),
            nonce: 3,
            proposed_by: Some(DEPLOYER.to_string()),
        });

        let settlement = senders()["ops"].sender().settle(&tx, 1).unwrap();
        assert_eq!(settlement.status, TransactionStatus::Pending);
        let safe = settlement.safe_transaction.unwrap();
        assert_eq!(safe.safe_tx_hash, "0xfeed");
        assert_eq!(safe.transaction_ids, vec!["tx-0xab"]);

        let err = senders()["ops"].sender().settle(&broadcast(SAFE), 1).unwrap_err();
        assert!(err.to_string().contains("carries no proposal"));
    }
}
