//! Run a single deployment script.

use std::collections::BTreeMap;
use std::path::Path;

use crate::context::AppContext;
use crate::error::Result;
use crate::graph::ExecutionStep;
use crate::orchestration::{StepExecutor, StepReport};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub script: String,
    pub network: String,
    /// Overrides the configured namespace
    pub namespace: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn new(script: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            network: network.into(),
            namespace: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

pub struct RunCommand<'a> {
    ctx: &'a AppContext,
}

impl<'a> RunCommand<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub fn execute(&self, options: &RunOptions) -> Result<StepReport> {
        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| self.ctx.config().namespace.clone());
        let step = ExecutionStep {
            name: script_name(&options.script),
            script: options.script.clone(),
            depends_on: Vec::new(),
            env: options.env.clone(),
        };
        StepExecutor::new(self.ctx, &options.network, namespace).execute(&step)
    }
}

/// `script/DeployCounter.s.sol` -> `DeployCounter`
fn script_name(script: &str) -> String {
    let file = Path::new(script)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| script.to_string());
    file.split('.').next().unwrap_or(&file).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_name_is_script_stem() {
        assert_eq!(script_name("script/DeployCounter.s.sol"), "DeployCounter");
        assert_eq!(script_name("Deploy"), "Deploy");
    }
}
