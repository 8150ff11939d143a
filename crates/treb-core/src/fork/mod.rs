//! Fork sessions: a disposable local node per network, with a stack of
//! paired chain snapshots and registry backups.
//!
//! Layout under `.treb/`:
//!
//! ```text
//! fork-state.json
//! priv/fork/<network>/anvil.log
//! priv/fork/<network>/anvil.pid
//! priv/fork/<network>/snapshots/<index>/{deployments,transactions,safe-txs}.json
//! ```

pub mod backup;
pub mod process;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod state;

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub use session::{EnterReport, ExitReport, ForkDiff, ForkHealth, ForkSessionManager, ForkStatus};
pub use snapshot::{RevertReport, SnapshotSynchronizer};
pub use state::{ForkEntry, ForkState, ForkStateStore, SnapshotEntry};

/// `.treb/priv/fork/<network>`
pub fn fork_dir(state_dir: &Path, network: &str) -> PathBuf {
    state_dir.join("priv").join("fork").join(network)
}

/// `.treb/priv/fork/<network>/snapshots/<index>`
pub fn snapshot_dir(state_dir: &Path, network: &str, index: usize) -> PathBuf {
    fork_dir(state_dir, network)
        .join("snapshots")
        .join(index.to_string())
}

/// Network names become directory names.
pub fn validate_network_name(network: &str) -> Result<()> {
    let valid = !network.is_empty()
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "network name '{network}' may only contain letters, digits, '-' and '_'"
        )))
    }
}
