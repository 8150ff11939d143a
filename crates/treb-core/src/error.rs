//! Domain errors for planning, registry bookkeeping and fork sessions.
//!
//! IO and serialization plumbing uses `anyhow` with context and is carried
//! through [`Error::Other`]. Everything a caller may want to react to has its
//! own variant, grouped by [`ErrorKind`].

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: dependency graph, missing fields, malformed records.
    Validation,
    /// The request collides with existing state; nothing was mutated.
    Conflict,
    /// The operation is not valid in the current state; nothing was mutated.
    State,
    /// The fork node process is no longer running.
    Crash,
    /// The operator-supplied fork setup script failed; the fork was rolled back.
    SetupFailure,
    /// A lookup found no match or more than one.
    Lookup,
    /// An external call exceeded its deadline.
    Timeout,
    /// Filesystem, serialization or transport failure.
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("orchestration group name must not be empty")]
    EmptyGroup,

    #[error("orchestration group '{0}' declares no components")]
    NoComponents(String),

    #[error("component '{0}' has no script")]
    MissingScript(String),

    #[error("component '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("component '{component}' depends on non-existent component '{dependency}'")]
    MissingDependency {
        component: String,
        dependency: String,
    },

    #[error("circular dependency detected involving components: [{}]", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "deployment '{id}' is already recorded at {existing}; refusing to overwrite with {requested}"
    )]
    DeploymentConflict {
        id: String,
        existing: String,
        requested: String,
    },

    #[error("transaction '{id}' conflicts with the recorded one: {reason}")]
    TransactionConflict { id: String, reason: String },

    #[error("safe transaction '{hash}' conflicts with the recorded one: {reason}")]
    SafeTransactionConflict { hash: String, reason: String },

    #[error("fork already active for network '{0}'")]
    ForkAlreadyActive(String),

    #[error("no active fork for network '{0}'")]
    NoActiveFork(String),

    #[error("nothing to revert for network '{0}'")]
    NothingToRevert(String),

    #[error(
        "fork for network '{network}' has crashed (process {pid} is no longer running); run `treb fork restart {network}` or `treb fork exit {network}`"
    )]
    ForkCrashed { network: String, pid: u32 },

    #[error("setup fork script failed for network '{network}': {reason}")]
    SetupFailed { network: String, reason: String },

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("multiple deployments match '{query}': {}", .candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyGroup
            | Error::NoComponents(_)
            | Error::MissingScript(_)
            | Error::SelfDependency(_)
            | Error::MissingDependency { .. }
            | Error::CircularDependency(_)
            | Error::InvalidRecord(_)
            | Error::InvalidConfig(_) => ErrorKind::Validation,
            Error::DeploymentConflict { .. }
            | Error::TransactionConflict { .. }
            | Error::SafeTransactionConflict { .. }
            | Error::ForkAlreadyActive(_) => ErrorKind::Conflict,
            Error::NoActiveFork(_) | Error::NothingToRevert(_) => ErrorKind::State,
            Error::ForkCrashed { .. } => ErrorKind::Crash,
            Error::SetupFailed { .. } => ErrorKind::SetupFailure,
            Error::NotFound(_) | Error::Ambiguous { .. } => ErrorKind::Lookup,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Other(_) => ErrorKind::Io,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_components() {
        let err = Error::CircularDependency(vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            err.to_string(),
            "circular dependency detected involving components: [A, B]"
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn crash_message_points_at_remediation() {
        let err = Error::ForkCrashed {
            network: "sepolia".to_string(),
            pid: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("crashed"));
        assert!(msg.contains("treb fork restart sepolia"));
        assert!(msg.contains("treb fork exit sepolia"));
        assert_eq!(err.kind(), ErrorKind::Crash);
    }
}
