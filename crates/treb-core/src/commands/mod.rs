//! High-level commands called by the CLI.
//!
//! Each command borrows an [`AppContext`](crate::context::AppContext) and
//! returns a serializable report; printing is left to the frontend. Fork
//! lifecycle commands are exposed directly by
//! [`ForkSessionManager`](crate::fork::ForkSessionManager) and
//! [`SnapshotSynchronizer`](crate::fork::SnapshotSynchronizer).

pub mod deployments;
pub mod orchestrate;
pub mod run;
pub mod transactions;

pub use deployments::{DeploymentsCommand, ShowOptions, ShowReport, TagOptions, TagReport};
pub use orchestrate::{OrchestrateCommand, OrchestrateOptions, OrchestrateReport};
pub use run::{RunCommand, RunOptions};
pub use transactions::TransactionsCommand;
