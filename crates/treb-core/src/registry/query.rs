//! Deployment lookups.

use serde::{Deserialize, Serialize};

use super::model::Registry;
use super::schema::Deployment;
use crate::error::{Error, Result};
use crate::types::{is_address, normalize_address};

/// Filters for listing deployments. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentFilter {
    pub namespace: Option<String>,
    pub chain_id: Option<u64>,
    pub contract_name: Option<String>,
    pub tag: Option<String>,
    pub fork: Option<bool>,
}

impl DeploymentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_contract_name(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = Some(fork);
        self
    }

    pub fn matches(&self, deployment: &Deployment) -> bool {
        self.namespace
            .as_ref()
            .is_none_or(|ns| &deployment.namespace == ns)
            && self.chain_id.is_none_or(|id| deployment.chain_id == id)
            && self
                .contract_name
                .as_ref()
                .is_none_or(|name| deployment.contract_name.eq_ignore_ascii_case(name))
            && self
                .tag
                .as_ref()
                .is_none_or(|tag| deployment.tags.contains(tag))
            && self.fork.is_none_or(|fork| deployment.fork == fork)
    }
}

/// Optional narrowing applied to short-name lookups.
#[derive(Debug, Clone, Default)]
pub struct LookupScope {
    pub namespace: Option<String>,
    pub chain_id: Option<u64>,
}

/// Picks one deployment when a lookup matches several.
pub trait Disambiguator {
    /// Return the index of the chosen candidate.
    fn choose(&self, query: &str, candidates: &[&Deployment]) -> Result<usize>;
}

impl Registry {
    /// Deployments matching `filter`, ordered by identity.
    pub fn list(&self, filter: &DeploymentFilter) -> Vec<&Deployment> {
        self.deployments
            .values()
            .filter(|deployment| filter.matches(deployment))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Deployment> {
        self.deployments.get(id)
    }

    pub fn find_by_address(&self, address: &str) -> Vec<&Deployment> {
        let address = normalize_address(address);
        self.deployments
            .values()
            .filter(|deployment| deployment.address == address)
            .collect()
    }

    /// Resolve `query` to one deployment. The query is tried as an
    /// identity, then an address, then a `Name` / `Name:label` short name.
    pub fn lookup(
        &self,
        query: &str,
        scope: &LookupScope,
        disambiguator: Option<&dyn Disambiguator>,
    ) -> Result<&Deployment> {
        let query = query.trim();
        if let Some(deployment) = self.deployments.get(query) {
            return Ok(deployment);
        }

        let candidates: Vec<&Deployment> = if is_address(query) {
            self.find_by_address(query)
                .into_iter()
                .filter(|deployment| in_scope(deployment, scope))
                .collect()
        } else {
            let (name, label) = query.split_once(':').unwrap_or((query, ""));
            self.deployments
                .values()
                .filter(|deployment| {
                    deployment.contract_name.eq_ignore_ascii_case(name)
                        && deployment.label == label
                        && in_scope(deployment, scope)
                })
                .collect()
        };

        match candidates.len() {
            0 => Err(Error::NotFound(query.to_string())),
            1 => Ok(candidates[0]),
            _ => match disambiguator {
                Some(disambiguator) => {
                    let index = disambiguator.choose(query, &candidates)?;
                    candidates
                        .get(index)
                        .copied()
                        .ok_or_else(|| Error::NotFound(query.to_string()))
                }
                None => Err(Error::Ambiguous {
                    query: query.to_string(),
                    candidates: candidates.iter().map(|d| d.id.clone()).collect(),
                }),
            },
        }
    }
}

fn in_scope(deployment: &Deployment, scope: &LookupScope) -> bool {
    scope
        .namespace
        .as_ref()
        .is_none_or(|ns| &deployment.namespace == ns)
        && scope.chain_id.is_none_or(|id| deployment.chain_id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::RecordBatch;
    use crate::registry::schema::Transaction;
    use crate::types::DeploymentKind;

    const SENDER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn registry() -> Registry {
        let mut batch = RecordBatch::default();
        for (i, (namespace, chain_id, label)) in [
            ("default", 1, ""),
            ("staging", 1, ""),
            ("default", 10, "v2"),
        ]
        .into_iter()
        .enumerate()
        {
            let tx = Transaction::new(chain_id, &format!("0x{i:02x}"), SENDER, i as u64)
                .executed_at(1);
            let mut deployment = Deployment::new(
                namespace,
                chain_id,
                "Counter",
                label,
                &format!("0x{:040x}", i + 1),
                DeploymentKind::Singleton,
                tx.id.clone(),
            );
            if namespace == "staging" {
                deployment.tags.insert("core".to_string());
            }
            batch.transactions.push(tx);
            batch.deployments.push(deployment);
        }
        let mut registry = Registry::new();
        registry.apply(batch).unwrap();
        registry
    }

    struct PickLast;

    impl Disambiguator for PickLast {
        fn choose(&self, _query: &str, candidates: &[&Deployment]) -> Result<usize> {
            Ok(candidates.len() - 1)
        }
    }

    #[test]
    fn filters_combine() {
        let registry = registry();
        assert_eq!(registry.list(&DeploymentFilter::new()).len(), 3);
        assert_eq!(
            registry
                .list(&DeploymentFilter::new().with_chain_id(1).with_tag("core"))
                .len(),
            1
        );
        assert!(
            registry
                .list(&DeploymentFilter::new().with_fork(true))
                .is_empty()
        );
    }

    #[test]
    fn short_name_is_ambiguous_without_scope() {
        let registry = registry();
        let err = registry
            .lookup("Counter", &LookupScope::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Ambiguous { ref candidates, .. } if candidates.len() == 2));

        let scope = LookupScope {
            namespace: Some("staging".to_string()),
            chain_id: None,
        };
        let found = registry.lookup("Counter", &scope, None).unwrap();
        assert_eq!(found.id, "staging/1/Counter");
    }

    #[test]
    fn disambiguator_picks_a_candidate() {
        let registry = registry();
        let found = registry
            .lookup("counter", &LookupScope::default(), Some(&PickLast))
            .unwrap();
        assert_eq!(found.id, "staging/1/Counter");
    }

    #[test]
    fn lookup_by_identity_label_and_address() {
        let registry = registry();
        let scope = LookupScope::default();
        assert_eq!(
            registry.lookup("default/1/Counter", &scope, None).unwrap().id,
            "default/1/Counter"
        );
        assert_eq!(
            registry.lookup("Counter:v2", &scope, None).unwrap().id,
            "default/10/Counter:v2"
        );
        let address = format!("0x{:040X}", 3);
        assert_eq!(
            registry.lookup(&address, &scope, None).unwrap().id,
            "default/10/Counter:v2"
        );
        assert!(matches!(
            registry.lookup("Vault", &scope, None),
            Err(Error::NotFound(_))
        ));
    }
}
