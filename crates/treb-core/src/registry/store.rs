//! On-disk registry: three JSON documents under `<project>/.treb/`.
//!
//! Every mutation loads the documents, applies the change to an in-memory
//! [`Registry`], checks referential closure and writes each document back
//! with tmp + rename. Nothing else writes these files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::document::{load_document, write_document};
use super::model::{CommitReport, RecordBatch, Registry, Upsert};
use super::schema::{Deployment, SafeTransaction, Transaction};
use crate::error::Result;

pub const STATE_DIR_NAME: &str = ".treb";
pub const DEPLOYMENTS_FILE: &str = "deployments.json";
pub const TRANSACTIONS_FILE: &str = "transactions.json";
pub const SAFE_TXS_FILE: &str = "safe-txs.json";

/// The documents backed up with every fork snapshot.
pub const REGISTRY_DOCUMENTS: [&str; 3] = [DEPLOYMENTS_FILE, TRANSACTIONS_FILE, SAFE_TXS_FILE];

#[derive(Debug, Clone)]
pub struct RegistryStore {
    root: PathBuf,
}

impl RegistryStore {
    /// Store rooted at `<project_root>/.treb`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(STATE_DIR_NAME))
    }

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn deployments_path(&self) -> PathBuf {
        self.root.join(DEPLOYMENTS_FILE)
    }

    pub fn transactions_path(&self) -> PathBuf {
        self.root.join(TRANSACTIONS_FILE)
    }

    pub fn safe_transactions_path(&self) -> PathBuf {
        self.root.join(SAFE_TXS_FILE)
    }

    pub fn load(&self) -> Result<Registry> {
        let deployments: BTreeMap<String, Deployment> =
            load_document(&self.deployments_path())?;
        let transactions: BTreeMap<String, Transaction> =
            load_document(&self.transactions_path())?;
        let safe_transactions: BTreeMap<String, SafeTransaction> =
            load_document(&self.safe_transactions_path())?;
        Ok(Registry {
            deployments,
            transactions,
            safe_transactions,
        })
    }

    /// Check and persist a registry.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        registry.check_integrity()?;
        write_document(&self.deployments_path(), &registry.deployments)?;
        write_document(&self.transactions_path(), &registry.transactions)?;
        write_document(&self.safe_transactions_path(), &registry.safe_transactions)?;
        debug!(
            root = %self.root.display(),
            deployments = registry.deployments.len(),
            transactions = registry.transactions.len(),
            safe_transactions = registry.safe_transactions.len(),
            "saved registry"
        );
        Ok(())
    }

    /// Load, mutate, save. The closure's error aborts without writing.
    fn update<T>(&self, apply: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        let mut registry = self.load()?;
        let before = registry.clone();
        let value = apply(&mut registry)?;
        if registry != before {
            self.save(&registry)?;
        }
        Ok(value)
    }

    /// Record a single deployment against an already recorded transaction.
    pub fn record_deployment(&self, deployment: Deployment) -> Result<Upsert> {
        self.update(|registry| registry.record_deployment(deployment))
    }

    pub fn record_transaction(&self, transaction: Transaction) -> Result<Upsert> {
        self.update(|registry| registry.record_transaction(transaction))
    }

    pub fn record_safe_transaction(&self, safe: SafeTransaction) -> Result<Upsert> {
        self.update(|registry| registry.record_safe_transaction(safe))
    }

    /// Commit everything one step produced, or nothing.
    pub fn commit(&self, batch: RecordBatch) -> Result<CommitReport> {
        if batch.is_empty() {
            return Ok(CommitReport::default());
        }
        self.update(|registry| registry.apply(batch))
    }

    pub fn mark_transaction_executed(&self, id: &str, block_number: u64) -> Result<Upsert> {
        self.update(|registry| registry.mark_transaction_executed(id, block_number))
    }

    pub fn mark_transaction_failed(&self, id: &str) -> Result<Upsert> {
        self.update(|registry| registry.mark_transaction_failed(id))
    }

    pub fn execute_safe_transaction(
        &self,
        safe_tx_hash: &str,
        execution_tx_hash: &str,
        block_number: u64,
    ) -> Result<Upsert> {
        self.update(|registry| {
            registry.execute_safe_transaction(safe_tx_hash, execution_tx_hash, block_number)
        })
    }

    pub fn add_tag(&self, deployment_id: &str, tag: &str) -> Result<Upsert> {
        self.update(|registry| registry.add_tag(deployment_id, tag))
    }

    pub fn remove_tag(&self, deployment_id: &str, tag: &str) -> Result<Upsert> {
        self.update(|registry| registry.remove_tag(deployment_id, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeploymentKind;
    use tempfile::TempDir;

    const SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn seeded(temp: &TempDir) -> RegistryStore {
        let store = RegistryStore::for_project(temp.path());
        let mut tx = Transaction::new(1, "0xAA", SENDER, 0).executed_at(10);
        tx.deployments.push("default/1/Token".to_string());
        let deployment = Deployment::new(
            "default",
            1,
            "Token",
            "",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            DeploymentKind::Singleton,
            tx.id.clone(),
        );
        store
            .commit(RecordBatch {
                transactions: vec![tx],
                deployments: vec![deployment],
                safe_transactions: vec![],
            })
            .unwrap();
        store
    }

    #[test]
    fn empty_project_loads_empty_registry() {
        let temp = TempDir::new().unwrap();
        let store = RegistryStore::for_project(temp.path());
        let registry = store.load().unwrap();
        assert!(registry.deployments.is_empty());
        assert!(!store.deployments_path().exists());
    }

    #[test]
    fn commit_writes_all_documents() {
        let temp = TempDir::new().unwrap();
        let store = seeded(&temp);

        assert!(store.deployments_path().exists());
        assert!(store.transactions_path().exists());
        assert!(store.safe_transactions_path().exists());

        let raw = std::fs::read_to_string(store.deployments_path()).unwrap();
        assert!(raw.contains("\"default/1/Token\""));
        assert!(raw.contains("\"transactionId\": \"tx-0xaa\""));
    }

    #[test]
    fn failed_update_leaves_documents_untouched() {
        let temp = TempDir::new().unwrap();
        let store = seeded(&temp);
        let before = std::fs::read(store.deployments_path()).unwrap();

        assert!(store.add_tag("default/1/Missing", "core").is_err());
        assert!(store.mark_transaction_failed("tx-0xaa").is_err());

        assert_eq!(std::fs::read(store.deployments_path()).unwrap(), before);
    }

    #[test]
    fn tags_round_trip_through_disk() {
        let temp = TempDir::new().unwrap();
        let store = seeded(&temp);

        assert_eq!(store.add_tag("default/1/Token", "core").unwrap(), Upsert::Updated);
        assert_eq!(store.add_tag("default/1/Token", "core").unwrap(), Upsert::Unchanged);
        let registry = store.load().unwrap();
        assert!(registry.deployments["default/1/Token"].tags.contains("core"));

        store.remove_tag("default/1/Token", "core").unwrap();
        let registry = store.load().unwrap();
        assert!(registry.deployments["default/1/Token"].tags.is_empty());
    }
}
