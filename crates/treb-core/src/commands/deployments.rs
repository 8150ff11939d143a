//! Listing, showing and tagging deployments.

use serde::Serialize;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::fork::rpc::has_code;
use crate::registry::{Deployment, DeploymentFilter, Disambiguator, LookupScope, Upsert};

#[derive(Debug, Clone, Default)]
pub struct ShowOptions {
    pub query: String,
    pub namespace: Option<String>,
    pub chain_id: Option<u64>,
    /// Network whose node is asked for the contract's code
    pub check_network: Option<String>,
}

impl ShowOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_check(mut self, network: impl Into<String>) -> Self {
        self.check_network = Some(network.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowReport {
    pub deployment: Deployment,
    /// Whether code exists at the address, when checked
    pub has_code: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct TagOptions {
    pub query: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl TagOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_add(mut self, tag: impl Into<String>) -> Self {
        self.add.push(tag.into());
        self
    }

    pub fn with_remove(mut self, tag: impl Into<String>) -> Self {
        self.remove.push(tag.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TagReport {
    pub deployment_id: String,
    pub tags: Vec<String>,
    pub changed: bool,
}

pub struct DeploymentsCommand<'a> {
    ctx: &'a AppContext,
}

impl<'a> DeploymentsCommand<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub fn list(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        let registry = self.ctx.registry().load()?;
        Ok(registry.list(filter).into_iter().cloned().collect())
    }

    pub fn show(
        &self,
        options: &ShowOptions,
        disambiguator: Option<&dyn Disambiguator>,
    ) -> Result<ShowReport> {
        let registry = self.ctx.registry().load()?;
        let scope = LookupScope {
            namespace: options.namespace.clone(),
            chain_id: options.chain_id,
        };
        let deployment = registry
            .lookup(&options.query, &scope, disambiguator)?
            .clone();

        let has_code = match &options.check_network {
            Some(network) => {
                let rpc = self.ctx.connector().connect(&self.ctx.rpc_url(network)?)?;
                let chain_id = rpc.chain_id()?;
                if chain_id != deployment.chain_id {
                    return Err(Error::InvalidConfig(format!(
                        "network '{network}' is chain {chain_id}, deployment '{}' is on chain {}",
                        deployment.id, deployment.chain_id
                    )));
                }
                Some(has_code(&rpc.get_code(&deployment.address)?))
            }
            None => None,
        };

        Ok(ShowReport {
            deployment,
            has_code,
        })
    }

    pub fn tag(
        &self,
        options: &TagOptions,
        disambiguator: Option<&dyn Disambiguator>,
    ) -> Result<TagReport> {
        let store = self.ctx.registry();
        let id = store
            .load()?
            .lookup(&options.query, &LookupScope::default(), disambiguator)?
            .id
            .clone();

        let mut changed = false;
        for tag in &options.add {
            changed |= store.add_tag(&id, tag)? != Upsert::Unchanged;
        }
        for tag in &options.remove {
            changed |= store.remove_tag(&id, tag)? != Upsert::Unchanged;
        }

        let tags = store
            .load()?
            .get(&id)
            .map(|d| d.tags.iter().cloned().collect())
            .unwrap_or_default();
        Ok(TagReport {
            deployment_id: id,
            tags,
            changed,
        })
    }
}
