//! Plan and run an orchestration file.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::context::AppContext;
use crate::error::Result;
use crate::graph::{ExecutionStep, OrchestrationConfig};
use crate::orchestration::{StepExecutor, StepReport};

#[derive(Debug, Clone)]
pub struct OrchestrateOptions {
    pub file: PathBuf,
    pub network: String,
    pub namespace: Option<String>,
    /// Resolve the plan without running anything
    pub dry_run: bool,
}

impl OrchestrateOptions {
    pub fn new(file: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            network: network.into(),
            namespace: None,
            dry_run: false,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrateReport {
    pub group: String,
    pub plan: Vec<ExecutionStep>,
    pub steps: Vec<StepReport>,
}

pub struct OrchestrateCommand<'a> {
    ctx: &'a AppContext,
}

impl<'a> OrchestrateCommand<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub fn execute(&self, options: &OrchestrateOptions) -> Result<OrchestrateReport> {
        let path = if options.file.is_absolute() {
            options.file.clone()
        } else {
            self.ctx.project_root().join(&options.file)
        };
        let config = OrchestrationConfig::load(&path)?;
        let plan = config.plan()?;
        info!(group = %config.group, steps = plan.len(), "resolved orchestration");

        if options.dry_run {
            return Ok(OrchestrateReport {
                group: config.group,
                plan,
                steps: Vec::new(),
            });
        }

        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| self.ctx.config().namespace.clone());
        let steps = StepExecutor::new(self.ctx, &options.network, namespace).execute_plan(&plan)?;
        Ok(OrchestrateReport {
            group: config.group,
            plan,
            steps,
        })
    }
}
