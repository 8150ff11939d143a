//! Deployment registry.
//!
//! Three correlated documents record what was deployed where:
//! `deployments.json`, `transactions.json` and `safe-txs.json`.

pub mod document;
pub mod model;
pub mod query;
pub mod schema;
pub mod store;

pub use model::{CommitReport, RecordBatch, Registry, Upsert};
pub use query::{DeploymentFilter, Disambiguator, LookupScope};
pub use schema::{Deployment, SafeTransaction, Transaction, deployment_id, transaction_id};
pub use store::{REGISTRY_DOCUMENTS, RegistryStore, STATE_DIR_NAME};
