//! Kahn's algorithm over the component graph.
//!
//! Ties are broken lexically: the ready queue is sorted before the first pop
//! and re-sorted whenever a component becomes ready, so the plan does not
//! depend on map iteration order.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::{ExecutionStep, OrchestrationConfig};
use crate::error::{Error, Result};

/// Check the group before any ordering work. Components are visited in
/// lexical order so the first error reported is stable.
pub fn validate(config: &OrchestrationConfig) -> Result<()> {
    if config.group.trim().is_empty() {
        return Err(Error::EmptyGroup);
    }
    if config.components.is_empty() {
        return Err(Error::NoComponents(config.group.clone()));
    }

    let mut names: Vec<&String> = config.components.keys().collect();
    names.sort();

    for name in names {
        let component = &config.components[name];
        if component.script.trim().is_empty() {
            return Err(Error::MissingScript(name.clone()));
        }
        for dependency in &component.depends_on {
            if dependency == name {
                return Err(Error::SelfDependency(name.clone()));
            }
            if !config.components.contains_key(dependency) {
                return Err(Error::MissingDependency {
                    component: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Produce the execution plan for `config`, or fail without a partial plan.
pub fn resolve(config: &OrchestrationConfig) -> Result<Vec<ExecutionStep>> {
    validate(config)?;

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, component) in &config.components {
        in_degree.insert(name.as_str(), component.depends_on.len());
        for dependency in &component.depends_on {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(name.as_str());
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    ready.make_contiguous().sort_unstable();

    let mut steps = Vec::with_capacity(config.components.len());
    while let Some(name) = ready.pop_front() {
        let component = &config.components[name];
        steps.push(ExecutionStep {
            name: name.to_string(),
            script: component.script.clone(),
            depends_on: component.depends_on.clone(),
            env: component.env.clone(),
        });

        let mut released = false;
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(*dependent);
                    released = true;
                }
            }
        }
        if released {
            ready.make_contiguous().sort_unstable();
        }
    }

    if steps.len() < config.components.len() {
        let mut stuck: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        stuck.sort();
        return Err(Error::CircularDependency(stuck));
    }

    debug!(
        group = %config.group,
        order = ?steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        "resolved execution plan"
    );
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ComponentConfig;

    fn names(steps: &[ExecutionStep]) -> Vec<&str> {
        steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn independent_components_run_in_lexical_order() {
        let config = OrchestrationConfig::new("core")
            .with_component(
                "C",
                ComponentConfig::new("C.s.sol")
                    .with_dependency("A")
                    .with_dependency("B"),
            )
            .with_component("B", ComponentConfig::new("B.s.sol"))
            .with_component("A", ComponentConfig::new("A.s.sol"));

        let steps = resolve(&config).unwrap();
        assert_eq!(names(&steps), vec!["A", "B", "C"]);
        assert_eq!(steps[2].depends_on, vec!["A", "B"]);
    }

    #[test]
    fn newly_ready_components_are_resorted() {
        // Z is ready first; releasing it makes both M and B ready, B must come first.
        let config = OrchestrationConfig::new("core")
            .with_component("Z", ComponentConfig::new("Z.s.sol"))
            .with_component("M", ComponentConfig::new("M.s.sol").with_dependency("Z"))
            .with_component("B", ComponentConfig::new("B.s.sol").with_dependency("Z"))
            .with_component("Y", ComponentConfig::new("Y.s.sol").with_dependency("B"));

        let steps = resolve(&config).unwrap();
        assert_eq!(names(&steps), vec!["Z", "B", "M", "Y"]);
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let config = OrchestrationConfig::new("core")
            .with_component("A", ComponentConfig::new("A.s.sol").with_dependency("B"))
            .with_component("B", ComponentConfig::new("B.s.sol").with_dependency("A"));

        let err = resolve(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "circular dependency detected involving components: [A, B]"
        );
    }

    #[test]
    fn cycle_report_excludes_resolvable_components() {
        let config = OrchestrationConfig::new("core")
            .with_component("Root", ComponentConfig::new("Root.s.sol"))
            .with_component(
                "A",
                ComponentConfig::new("A.s.sol")
                    .with_dependency("Root")
                    .with_dependency("C"),
            )
            .with_component("B", ComponentConfig::new("B.s.sol").with_dependency("A"))
            .with_component("C", ComponentConfig::new("C.s.sol").with_dependency("B"));

        match resolve(&config).unwrap_err() {
            Error::CircularDependency(components) => {
                assert_eq!(components, vec!["A", "B", "C"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_reported_before_cycles() {
        let config = OrchestrationConfig::new("core")
            .with_component("X", ComponentConfig::new("X.s.sol").with_dependency("X"));

        let err = resolve(&config).unwrap_err();
        assert_eq!(err.to_string(), "component 'X' cannot depend on itself");
    }

    #[test]
    fn missing_dependency_is_reported() {
        let config = OrchestrationConfig::new("core")
            .with_component("Vault", ComponentConfig::new("V.s.sol").with_dependency("Token"));

        let err = resolve(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "component 'Vault' depends on non-existent component 'Token'"
        );
    }

    #[test]
    fn missing_script_and_empty_group_are_rejected() {
        let config =
            OrchestrationConfig::new("core").with_component("A", ComponentConfig::default());
        assert!(matches!(resolve(&config), Err(Error::MissingScript(name)) if name == "A"));

        let config = OrchestrationConfig::new("  ")
            .with_component("A", ComponentConfig::new("A.s.sol"));
        assert!(matches!(resolve(&config), Err(Error::EmptyGroup)));

        let config = OrchestrationConfig::new("core");
        assert!(matches!(resolve(&config), Err(Error::NoComponents(_))));
    }
}
