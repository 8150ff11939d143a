//! Configuration schema for treb.toml
//!
//! ```toml
//! namespace = "staging"
//!
//! [networks]
//! sepolia = "${SEPOLIA_RPC_URL}"
//!
//! [senders.default]
//! type = "private_key"
//! address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
//!
//! [fork]
//! setup = "script/ForkSetup.s.sol"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::sender::SenderConfig;

/// Root configuration structure for treb.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrebConfig {
    /// Namespace used when a command does not name one
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Network name -> RPC endpoint (`${ENV_VAR}` or a literal URL)
    #[serde(default)]
    pub networks: BTreeMap<String, String>,

    /// Named senders
    #[serde(default)]
    pub senders: BTreeMap<String, SenderConfig>,

    #[serde(default)]
    pub fork: ForkSettings,

    #[serde(default)]
    pub script: ScriptSettings,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for TrebConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            networks: BTreeMap::new(),
            senders: BTreeMap::new(),
            fork: ForkSettings::default(),
            script: ScriptSettings::default(),
        }
    }
}

/// Fork node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSettings {
    /// Node binary; resolved against the Foundry install dir when not on PATH
    #[serde(default = "default_anvil")]
    pub anvil: String,

    /// Optional script run against every freshly started fork
    #[serde(default)]
    pub setup: Option<String>,

    /// First port tried when allocating a fork port
    #[serde(default = "default_port_base")]
    pub port_base: u16,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

fn default_anvil() -> String {
    "anvil".to_string()
}

fn default_port_base() -> u16 {
    8545
}

fn default_ready_timeout() -> u64 {
    60
}

fn default_rpc_timeout() -> u64 {
    30
}

impl Default for ForkSettings {
    fn default() -> Self {
        Self {
            anvil: default_anvil(),
            setup: None,
            port_base: default_port_base(),
            ready_timeout_secs: default_ready_timeout(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

/// Script runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSettings {
    #[serde(default = "default_script_command")]
    pub command: String,

    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

fn default_script_command() -> String {
    "forge".to_string()
}

fn default_script_timeout() -> u64 {
    600
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            command: default_script_command(),
            timeout_secs: default_script_timeout(),
        }
    }
}

/// A network endpoint as written in treb.toml.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcEndpoint {
    /// `${VAR}`: resolved from the environment at use time
    EnvVar(String),
    /// A literal URL
    Literal(String),
}

impl RpcEndpoint {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            Some(var) if !var.is_empty() => RpcEndpoint::EnvVar(var.to_string()),
            _ => RpcEndpoint::Literal(trimmed.to_string()),
        }
    }

    /// Resolve to a concrete URL.
    pub fn resolve(&self) -> Result<String> {
        match self {
            RpcEndpoint::EnvVar(var) => std::env::var(var).map_err(|_| {
                Error::InvalidConfig(format!("environment variable '{var}' is not set"))
            }),
            RpcEndpoint::Literal(url) => Ok(url.clone()),
        }
    }
}

impl TrebConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint configured for `network`.
    pub fn endpoint(&self, network: &str) -> Result<RpcEndpoint> {
        self.networks
            .get(network)
            .map(|raw| RpcEndpoint::parse(raw))
            .ok_or_else(|| {
                Error::InvalidConfig(format!("network '{network}' is not configured"))
            })
    }

    /// Look up a sender by name.
    pub fn sender(&self, name: &str) -> Result<&SenderConfig> {
        self.senders
            .get(name)
            .ok_or_else(|| Error::InvalidConfig(format!("sender '{name}' is not configured")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::InvalidConfig("namespace must not be empty".to_string()));
        }
        for (name, raw) in &self.networks {
            if raw.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "network '{name}' has an empty rpc endpoint"
                )));
            }
        }
        for (name, sender) in &self.senders {
            sender.validate(name, &self.senders)?;
        }
        Ok(())
    }
}
