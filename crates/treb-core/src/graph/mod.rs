//! Orchestration plans: components, their dependencies and execution order.
//!
//! An orchestration file declares a group of components:
//!
//! ```toml
//! group = "core"
//!
//! [components.Token]
//! script = "script/DeployToken.s.sol"
//!
//! [components.Vault]
//! script = "script/DeployVault.s.sol"
//! depends_on = ["Token"]
//! env = { VAULT_CAP = "1000" }
//! ```

pub mod resolver;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use resolver::{resolve, validate};

/// A component as declared in an orchestration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Script reference, relative to the project root
    #[serde(default)]
    pub script: String,

    /// Names of components that must run first, in declared order
    #[serde(default, alias = "deps")]
    pub depends_on: Vec<String>,

    /// Environment overrides passed to the script
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ComponentConfig {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A named group of components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub components: HashMap<String, ComponentConfig>,
}

impl OrchestrationConfig {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            components: HashMap::new(),
        }
    }

    pub fn with_component(mut self, name: impl Into<String>, config: ComponentConfig) -> Self {
        self.components.insert(name.into(), config);
        self
    }

    /// Load an orchestration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read orchestration file: {}", path.display()))?;
        crate::config::parser::parse_toml_str(&content)
            .with_context(|| format!("Failed to parse orchestration file: {}", path.display()))
    }

    /// Validate and linearize this group.
    pub fn plan(&self) -> Result<Vec<ExecutionStep>> {
        resolve(self)
    }
}

/// A component projected into run order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStep {
    pub name: String,
    pub script: String,
    pub depends_on: Vec<String>,
    pub env: BTreeMap<String, String>,
}
