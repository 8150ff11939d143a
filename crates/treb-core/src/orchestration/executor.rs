//! Sequential step execution against the registry.
//!
//! Each step broadcasts its script, settles every transaction through the
//! configured sender and commits the results as one batch. On a network
//! with an active fork the step is preceded by a snapshot push; a failing
//! step pops that snapshot again, so the chain and registry are left as
//! they were before it ran.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::error::Result;
use crate::graph::ExecutionStep;
use crate::registry::{
    CommitReport, Deployment, RecordBatch, SafeTransaction, Transaction, deployment_id,
};
use crate::script::{ScriptInvocation, ScriptOutcome};
use crate::sender::{PrivateKeySender, Sender, SenderConfig, sender_for_address};

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub script: String,
    pub chain_id: u64,
    /// Snapshot pushed before the step, when a fork is active
    pub snapshot_index: Option<usize>,
    pub commit: CommitReport,
}

pub struct StepExecutor<'a> {
    ctx: &'a AppContext,
    network: String,
    namespace: String,
}

impl<'a> StepExecutor<'a> {
    pub fn new(ctx: &'a AppContext, network: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            ctx,
            network: network.into(),
            namespace: namespace.into(),
        }
    }

    /// Run steps in order, stopping at the first failure.
    pub fn execute_plan(&self, steps: &[ExecutionStep]) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(steps.len());
        for step in steps {
            reports.push(self.execute(step)?);
        }
        Ok(reports)
    }

    pub fn execute(&self, step: &ExecutionStep) -> Result<StepReport> {
        let fork = self.ctx.fork_state().load()?.get(&self.network).cloned();

        let Some(fork) = fork else {
            let rpc_url = self.ctx.config().endpoint(&self.network)?.resolve()?;
            let chain_id = self.ctx.connector().connect(&rpc_url)?.chain_id()?;
            let commit = self.broadcast(step, &rpc_url, chain_id, false, BTreeMap::new())?;
            return Ok(self.report(step, chain_id, None, commit));
        };

        let snapshot = self
            .ctx
            .snapshots()
            .push(&self.network, &format!("run {}", step.script))?;
        let env = BTreeMap::from([(fork.env_var.clone(), fork.fork_url.clone())]);

        match self.broadcast(step, &fork.fork_url, fork.chain_id, true, env) {
            Ok(commit) => Ok(self.report(step, fork.chain_id, Some(snapshot.index), commit)),
            Err(err) => {
                warn!(
                    network = %self.network,
                    step = %step.name,
                    error = %err,
                    "step failed on fork, discarding its snapshot"
                );
                if let Err(revert_err) = self.ctx.snapshots().revert(&self.network) {
                    warn!(network = %self.network, error = %revert_err, "failed to discard snapshot");
                }
                Err(err)
            }
        }
    }

    fn broadcast(
        &self,
        step: &ExecutionStep,
        rpc_url: &str,
        chain_id: u64,
        fork: bool,
        extra_env: BTreeMap<String, String>,
    ) -> Result<CommitReport> {
        let mut env = extra_env;
        env.extend(step.env.clone());
        let invocation = ScriptInvocation {
            project_root: self.ctx.project_root().to_path_buf(),
            script: step.script.clone(),
            network: self.network.clone(),
            rpc_url: rpc_url.to_string(),
            chain_id,
            namespace: self.namespace.clone(),
            env,
        };

        let outcome = self.ctx.runner().run(&invocation)?;
        let batch = record_batch(
            &outcome,
            &BatchContext {
                namespace: &self.namespace,
                chain_id,
                script: &step.script,
                fork,
                senders: &self.ctx.config().senders,
            },
        )?;
        let commit = self.ctx.registry().commit(batch)?;
        info!(
            network = %self.network,
            step = %step.name,
            changed = commit.changed(),
            "step committed"
        );
        Ok(commit)
    }

    fn report(
        &self,
        step: &ExecutionStep,
        chain_id: u64,
        snapshot_index: Option<usize>,
        commit: CommitReport,
    ) -> StepReport {
        StepReport {
            step: step.name.clone(),
            script: step.script.clone(),
            chain_id,
            snapshot_index,
            commit,
        }
    }
}

/// Where a script outcome is being recorded.
pub struct BatchContext<'a> {
    pub namespace: &'a str,
    pub chain_id: u64,
    pub script: &'a str,
    pub fork: bool,
    pub senders: &'a BTreeMap<String, SenderConfig>,
}

/// Turn a script outcome into registry records, settling each transaction
/// through the sender that broadcast it.
pub fn record_batch(outcome: &ScriptOutcome, ctx: &BatchContext<'_>) -> Result<RecordBatch> {
    let mut batch = RecordBatch::default();

    for broadcast in &outcome.transactions {
        let settlement = match sender_for_address(ctx.senders, &broadcast.sender) {
            Some((_, config)) => config.sender().settle(broadcast, ctx.chain_id)?,
            None => PrivateKeySender.settle(broadcast, ctx.chain_id)?,
        };

        let mut transaction =
            Transaction::new(ctx.chain_id, &broadcast.hash, &broadcast.sender, broadcast.nonce);
        transaction.status = settlement.status;
        transaction.block_number = settlement.block_number;
        transaction.fork = ctx.fork;

        for reported in &broadcast.deployments {
            let mut deployment = Deployment::new(
                ctx.namespace,
                ctx.chain_id,
                reported.contract_name.clone(),
                reported.label.clone(),
                &reported.address,
                reported.kind,
                transaction.id.clone(),
            );
            deployment.implementation = reported.implementation.as_deref().map(|short| {
                let (name, label) = short.split_once(':').unwrap_or((short, ""));
                deployment_id(ctx.namespace, ctx.chain_id, name, label)
            });
            deployment.salt = reported.salt.clone();
            deployment.script = Some(ctx.script.to_string());
            deployment.tags = reported.tags.iter().cloned().collect();
            deployment.fork = ctx.fork;

            transaction.deployments.push(deployment.id.clone());
            batch.deployments.push(deployment);
        }

        if let Some(safe) = settlement.safe_transaction {
            let safe = SafeTransaction {
                fork: ctx.fork,
                ..safe
            };
            transaction.safe_transaction = Some(safe.safe_tx_hash.clone());
            batch.safe_transactions.push(safe);
        }
        batch.transactions.push(transaction);
    }

    Ok(batch)
}
