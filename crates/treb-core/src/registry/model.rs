//! In-memory view of the three registry documents and the rules for
//! changing them.

use std::collections::BTreeMap;

use serde::Serialize;

use super::schema::{Deployment, SafeTransaction, Transaction, deployment_id, transaction_id};
use crate::error::{Error, Result};
use crate::types::{DeploymentKind, SafeTransactionStatus, TransactionStatus, normalize_address};

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Everything one step wants to record. Applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub transactions: Vec<Transaction>,
    pub deployments: Vec<Deployment>,
    pub safe_transactions: Vec<SafeTransaction>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
            && self.deployments.is_empty()
            && self.safe_transactions.is_empty()
    }
}

/// Per-record outcomes of a committed batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub transactions: Vec<(String, Upsert)>,
    pub deployments: Vec<(String, Upsert)>,
    pub safe_transactions: Vec<(String, Upsert)>,
}

impl CommitReport {
    pub fn changed(&self) -> bool {
        self.transactions
            .iter()
            .chain(&self.deployments)
            .chain(&self.safe_transactions)
            .any(|(_, outcome)| *outcome != Upsert::Unchanged)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    pub deployments: BTreeMap<String, Deployment>,
    pub transactions: BTreeMap<String, Transaction>,
    pub safe_transactions: BTreeMap<String, SafeTransaction>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deployment. Re-recording the same identity at the same
    /// address is a no-op; anything else that collides is rejected.
    pub fn record_deployment(&mut self, deployment: Deployment) -> Result<Upsert> {
        let expected = deployment_id(
            &deployment.namespace,
            deployment.chain_id,
            &deployment.contract_name,
            &deployment.label,
        );
        if deployment.id != expected {
            return Err(Error::InvalidRecord(format!(
                "deployment id '{}' does not match its parts ('{}')",
                deployment.id, expected
            )));
        }
        if deployment.contract_name.is_empty() || deployment.namespace.is_empty() {
            return Err(Error::InvalidRecord(format!(
                "deployment '{}' needs a namespace and contract name",
                deployment.id
            )));
        }

        let address = normalize_address(&deployment.address);
        if let Some(existing) = self.deployments.get(&deployment.id) {
            if existing.address != address {
                return Err(Error::DeploymentConflict {
                    id: deployment.id,
                    existing: existing.address.clone(),
                    requested: address,
                });
            }
            if existing.kind != deployment.kind {
                return Err(Error::DeploymentConflict {
                    id: deployment.id,
                    existing: format!("{} ({})", existing.address, existing.kind),
                    requested: format!("{} ({})", address, deployment.kind),
                });
            }
            return Ok(Upsert::Unchanged);
        }

        let Some(transaction) = self.transactions.get_mut(&deployment.transaction_id) else {
            return Err(Error::InvalidRecord(format!(
                "transaction '{}' referenced by deployment '{}' does not exist",
                deployment.transaction_id, deployment.id
            )));
        };
        if transaction.chain_id != deployment.chain_id {
            return Err(Error::InvalidRecord(format!(
                "deployment '{}' is on chain {} but transaction '{}' is on chain {}",
                deployment.id, deployment.chain_id, transaction.id, transaction.chain_id
            )));
        }
        if !transaction.deployments.contains(&deployment.id) {
            transaction.deployments.push(deployment.id.clone());
        }

        let mut deployment = deployment;
        deployment.address = address;
        self.deployments.insert(deployment.id.clone(), deployment);
        Ok(Upsert::Inserted)
    }

    /// Record a transaction. A pending transaction may move to a terminal
    /// status; terminal statuses never change.
    pub fn record_transaction(&mut self, transaction: Transaction) -> Result<Upsert> {
        if transaction.id != transaction_id(&transaction.hash) {
            return Err(Error::InvalidRecord(format!(
                "transaction id '{}' does not match hash '{}'",
                transaction.id, transaction.hash
            )));
        }

        let Some(existing) = self.transactions.get_mut(&transaction.id) else {
            self.transactions
                .insert(transaction.id.clone(), transaction);
            return Ok(Upsert::Inserted);
        };

        let conflict = |reason: String| Error::TransactionConflict {
            id: transaction.id.clone(),
            reason,
        };
        if existing.chain_id != transaction.chain_id {
            return Err(conflict(format!(
                "chain {} != {}",
                existing.chain_id, transaction.chain_id
            )));
        }
        if existing.sender != normalize_address(&transaction.sender)
            || existing.nonce != transaction.nonce
        {
            return Err(conflict("sender or nonce differs".to_string()));
        }

        let mut changed = false;
        if existing.status != transaction.status {
            if existing.status.is_terminal() {
                return Err(conflict(format!(
                    "status {} is terminal, cannot become {}",
                    existing.status, transaction.status
                )));
            }
            if transaction.status.is_terminal() {
                existing.status = transaction.status;
                existing.block_number = transaction.block_number;
                changed = true;
            }
        }
        for id in &transaction.deployments {
            if !existing.deployments.contains(id) {
                existing.deployments.push(id.clone());
                changed = true;
            }
        }
        if existing.safe_transaction.is_none() && transaction.safe_transaction.is_some() {
            existing.safe_transaction = transaction.safe_transaction.clone();
            changed = true;
        }

        Ok(if changed {
            Upsert::Updated
        } else {
            Upsert::Unchanged
        })
    }

    pub fn record_safe_transaction(&mut self, safe: SafeTransaction) -> Result<Upsert> {
        let Some(existing) = self.safe_transactions.get_mut(&safe.safe_tx_hash) else {
            self.safe_transactions
                .insert(safe.safe_tx_hash.clone(), safe);
            return Ok(Upsert::Inserted);
        };

        if existing.safe_address != normalize_address(&safe.safe_address)
            || existing.chain_id != safe.chain_id
            || existing.nonce != safe.nonce
        {
            return Err(Error::SafeTransactionConflict {
                hash: safe.safe_tx_hash,
                reason: "safe, chain or nonce differs".to_string(),
            });
        }
        let mut changed = false;
        for id in &safe.transaction_ids {
            if !existing.transaction_ids.contains(id) {
                existing.transaction_ids.push(id.clone());
                changed = true;
            }
        }
        Ok(if changed {
            Upsert::Updated
        } else {
            Upsert::Unchanged
        })
    }

    /// Apply a batch on a copy; only a batch that leaves the registry
    /// consistent replaces `self`.
    pub fn apply(&mut self, batch: RecordBatch) -> Result<CommitReport> {
        let mut working = self.clone();
        let mut report = CommitReport::default();

        for transaction in batch.transactions {
            let id = transaction.id.clone();
            let outcome = working.record_transaction(transaction)?;
            report.transactions.push((id, outcome));
        }

        for deployment in batch.deployments {
            let id = deployment.id.clone();
            let requested_tx = deployment.transaction_id.clone();
            let outcome = working.record_deployment(deployment)?;
            if outcome == Upsert::Unchanged {
                // An idempotent re-run keeps the original owner; drop the
                // reference from the re-broadcast transaction.
                let owner = working.deployments[&id].transaction_id.clone();
                if owner != requested_tx
                    && let Some(tx) = working.transactions.get_mut(&requested_tx)
                {
                    tx.deployments.retain(|d| d != &id);
                }
            }
            report.deployments.push((id, outcome));
        }

        for safe in batch.safe_transactions {
            let hash = safe.safe_tx_hash.clone();
            let outcome = working.record_safe_transaction(safe)?;
            report.safe_transactions.push((hash, outcome));
        }

        working.check_integrity()?;
        *self = working;
        Ok(report)
    }

    /// Verify referential closure between the three documents.
    pub fn check_integrity(&self) -> Result<()> {
        for deployment in self.deployments.values() {
            let Some(tx) = self.transactions.get(&deployment.transaction_id) else {
                return Err(Error::InvalidRecord(format!(
                    "deployment '{}' references missing transaction '{}'",
                    deployment.id, deployment.transaction_id
                )));
            };
            if !tx.deployments.contains(&deployment.id) {
                return Err(Error::InvalidRecord(format!(
                    "transaction '{}' does not list deployment '{}'",
                    tx.id, deployment.id
                )));
            }
            if let Some(implementation) = &deployment.implementation {
                if deployment.kind != DeploymentKind::Proxy {
                    return Err(Error::InvalidRecord(format!(
                        "deployment '{}' has an implementation but is not a proxy",
                        deployment.id
                    )));
                }
                if !self.deployments.contains_key(implementation) {
                    return Err(Error::InvalidRecord(format!(
                        "proxy '{}' references missing implementation '{}'",
                        deployment.id, implementation
                    )));
                }
            }
        }

        for tx in self.transactions.values() {
            for id in &tx.deployments {
                match self.deployments.get(id) {
                    Some(deployment) if deployment.transaction_id == tx.id => {}
                    Some(deployment) => {
                        return Err(Error::InvalidRecord(format!(
                            "transaction '{}' lists deployment '{}' owned by '{}'",
                            tx.id, id, deployment.transaction_id
                        )));
                    }
                    None => {
                        return Err(Error::InvalidRecord(format!(
                            "transaction '{}' lists missing deployment '{}'",
                            tx.id, id
                        )));
                    }
                }
            }
            if let Some(hash) = &tx.safe_transaction
                && !self.safe_transactions.contains_key(hash)
            {
                return Err(Error::InvalidRecord(format!(
                    "transaction '{}' references missing safe transaction '{}'",
                    tx.id, hash
                )));
            }
        }

        for safe in self.safe_transactions.values() {
            for id in &safe.transaction_ids {
                if !self.transactions.contains_key(id) {
                    return Err(Error::InvalidRecord(format!(
                        "safe transaction '{}' lists missing transaction '{}'",
                        safe.safe_tx_hash, id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn mark_transaction_executed(&mut self, id: &str, block_number: u64) -> Result<Upsert> {
        self.finish_transaction(id, TransactionStatus::Executed, Some(block_number))
    }

    pub fn mark_transaction_failed(&mut self, id: &str) -> Result<Upsert> {
        self.finish_transaction(id, TransactionStatus::Failed, None)
    }

    fn finish_transaction(
        &mut self,
        id: &str,
        status: TransactionStatus,
        block_number: Option<u64>,
    ) -> Result<Upsert> {
        let tx = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("transaction '{id}'")))?;
        if tx.status == status && tx.block_number == block_number {
            return Ok(Upsert::Unchanged);
        }
        if tx.status.is_terminal() {
            return Err(Error::TransactionConflict {
                id: id.to_string(),
                reason: format!("status {} is terminal, cannot become {}", tx.status, status),
            });
        }
        tx.status = status;
        tx.block_number = block_number;
        Ok(Upsert::Updated)
    }

    /// Mark a multisig proposal executed; every transaction it carries
    /// becomes `EXECUTED` in the same block.
    pub fn execute_safe_transaction(
        &mut self,
        safe_tx_hash: &str,
        execution_tx_hash: &str,
        block_number: u64,
    ) -> Result<Upsert> {
        let hash = safe_tx_hash.to_ascii_lowercase();
        let safe = self
            .safe_transactions
            .get(&hash)
            .ok_or_else(|| Error::NotFound(format!("safe transaction '{hash}'")))?;
        if safe.status == SafeTransactionStatus::Executed {
            return Ok(Upsert::Unchanged);
        }

        let mut working = self.clone();
        for id in safe.transaction_ids.clone() {
            working.mark_transaction_executed(&id, block_number)?;
        }
        if let Some(safe) = working.safe_transactions.get_mut(&hash) {
            safe.status = SafeTransactionStatus::Executed;
            safe.execution_tx_hash = Some(execution_tx_hash.to_ascii_lowercase());
            safe.executed_at = Some(chrono::Utc::now());
        }
        *self = working;
        Ok(Upsert::Updated)
    }

    pub fn add_tag(&mut self, deployment_id: &str, tag: &str) -> Result<Upsert> {
        let deployment = self
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(Error::InvalidRecord("tag must not be empty".to_string()));
        }
        Ok(if deployment.tags.insert(tag.to_string()) {
            Upsert::Updated
        } else {
            Upsert::Unchanged
        })
    }

    pub fn remove_tag(&mut self, deployment_id: &str, tag: &str) -> Result<Upsert> {
        let deployment = self
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(|| Error::NotFound(deployment_id.to_string()))?;
        Ok(if deployment.tags.remove(tag.trim()) {
            Upsert::Updated
        } else {
            Upsert::Unchanged
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_A: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const ADDR_B: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
    const SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn tx(hash: &str) -> Transaction {
        Transaction::new(31337, hash, SENDER, 0).executed_at(1)
    }

    fn counter(address: &str, tx_id: &str) -> Deployment {
        Deployment::new(
            "default",
            31337,
            "Counter",
            "",
            address,
            DeploymentKind::Singleton,
            tx_id,
        )
    }

    #[test]
    fn same_identity_and_address_is_a_noop() {
        let mut registry = Registry::new();
        registry.record_transaction(tx("0xaa")).unwrap();

        assert_eq!(
            registry.record_deployment(counter(ADDR_A, "tx-0xaa")).unwrap(),
            Upsert::Inserted
        );
        assert_eq!(
            registry
                .record_deployment(counter(&ADDR_A.to_lowercase(), "tx-0xaa"))
                .unwrap(),
            Upsert::Unchanged
        );
        assert_eq!(registry.deployments.len(), 1);
        assert_eq!(registry.transactions["tx-0xaa"].deployments.len(), 1);
    }

    #[test]
    fn same_identity_different_address_is_rejected() {
        let mut registry = Registry::new();
        registry.record_transaction(tx("0xaa")).unwrap();
        registry.record_deployment(counter(ADDR_A, "tx-0xaa")).unwrap();

        let err = registry
            .record_deployment(counter(ADDR_B, "tx-0xaa"))
            .unwrap_err();
        assert!(matches!(err, Error::DeploymentConflict { .. }));
        assert_eq!(
            registry.deployments["default/31337/Counter"].address,
            ADDR_A.to_lowercase()
        );
    }

    #[test]
    fn deployment_requires_existing_transaction() {
        let mut registry = Registry::new();
        let err = registry
            .record_deployment(counter(ADDR_A, "tx-0xmissing"))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut registry = Registry::new();
        let mut batch = RecordBatch::default();
        batch.transactions.push(tx("0xaa"));
        batch.deployments.push(counter(ADDR_A, "tx-0xaa"));
        registry.apply(batch).unwrap();

        let before = registry.clone();
        let mut conflicting = RecordBatch::default();
        conflicting.transactions.push(tx("0xbb"));
        conflicting.deployments.push(counter(ADDR_B, "tx-0xbb"));

        assert!(registry.apply(conflicting).is_err());
        assert_eq!(registry, before);
    }

    #[test]
    fn rerun_batch_keeps_original_owner() {
        let mut registry = Registry::new();
        let mut first = RecordBatch::default();
        let mut first_tx = tx("0xaa");
        first_tx.deployments.push("default/31337/Counter".to_string());
        first.transactions.push(first_tx);
        first.deployments.push(counter(ADDR_A, "tx-0xaa"));
        registry.apply(first).unwrap();

        let mut rerun = RecordBatch::default();
        let mut rerun_tx = Transaction::new(31337, "0xbb", SENDER, 1).executed_at(2);
        rerun_tx.deployments.push("default/31337/Counter".to_string());
        rerun.transactions.push(rerun_tx);
        rerun.deployments.push(counter(ADDR_A, "tx-0xbb"));

        let report = registry.apply(rerun).unwrap();
        assert_eq!(
            report.deployments,
            vec![("default/31337/Counter".to_string(), Upsert::Unchanged)]
        );
        assert_eq!(registry.deployments.len(), 1);
        assert!(registry.transactions["tx-0xbb"].deployments.is_empty());
        registry.check_integrity().unwrap();
    }

    #[test]
    fn terminal_status_never_changes() {
        let mut registry = Registry::new();
        registry.record_transaction(tx("0xaa")).unwrap();

        let err = registry.mark_transaction_failed("tx-0xaa").unwrap_err();
        assert!(err.to_string().contains("terminal"));

        let pending = Transaction::new(31337, "0xcc", SENDER, 2);
        registry.record_transaction(pending).unwrap();
        assert_eq!(
            registry.mark_transaction_executed("tx-0xcc", 9).unwrap(),
            Upsert::Updated
        );
        assert_eq!(
            registry.transactions["tx-0xcc"].status,
            TransactionStatus::Executed
        );
    }

    #[test]
    fn executing_safe_transaction_executes_its_transactions() {
        let mut registry = Registry::new();
        let mut pending = Transaction::new(31337, "0xdd", SENDER, 0);
        pending.safe_transaction = Some("0xsafe".to_string());
        let mut safe = SafeTransaction::new(
            "0xSAFE",
            "0x1111111111111111111111111111111111111111",
            31337,
            4,
        );
        safe.transaction_ids.push(pending.id.clone());

        let batch = RecordBatch {
            transactions: vec![pending],
            deployments: vec![],
            safe_transactions: vec![safe],
        };
        registry.apply(batch).unwrap();

        registry
            .execute_safe_transaction("0xsafe", "0xexec", 77)
            .unwrap();
        let tx = &registry.transactions["tx-0xdd"];
        assert_eq!(tx.status, TransactionStatus::Executed);
        assert_eq!(tx.block_number, Some(77));
        assert_eq!(
            registry.safe_transactions["0xsafe"].status,
            SafeTransactionStatus::Executed
        );
    }
}
