//! Interactive disambiguation of deployment lookups.
//!
//! When a short name matches several deployments and the terminal is
//! interactive, the user picks one from a list. Uses dialoguer for the
//! prompt.

use console::{Term, style};
use dialoguer::{Select, theme::ColorfulTheme};

use treb_core::registry::{Deployment, Disambiguator};

/// Prompts on the terminal to choose among matching deployments.
pub struct PromptDisambiguator {
    theme: ColorfulTheme,
}

impl PromptDisambiguator {
    /// A prompt when stdin and stdout are terminals, otherwise `None` so
    /// ambiguous lookups fail with the candidate list.
    pub fn for_terminal() -> Option<Self> {
        if Term::stdout().is_term() && Term::stderr().is_term() {
            Some(Self {
                theme: ColorfulTheme::default(),
            })
        } else {
            None
        }
    }
}

impl Disambiguator for PromptDisambiguator {
    fn choose(&self, query: &str, candidates: &[&Deployment]) -> treb_core::Result<usize> {
        let items: Vec<String> = candidates.iter().map(|d| describe(d)).collect();
        let prompt = format!(
            "{} matches {} deployments, pick one",
            style(query).bold(),
            candidates.len()
        );
        let selection = Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(&items)
            .default(0)
            .interact()
            .map_err(|err| anyhow::anyhow!("Selection aborted: {err}"))?;
        Ok(selection)
    }
}

/// One line per candidate: identity, address and kind.
pub fn describe(deployment: &Deployment) -> String {
    let mut line = format!(
        "{}  {}  {}",
        deployment.id, deployment.address, deployment.kind
    );
    if deployment.fork {
        line.push_str("  [fork]");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use treb_core::types::DeploymentKind;

    #[test]
    fn describe_marks_fork_deployments() {
        let mut deployment = Deployment::new(
            "default",
            1,
            "Counter",
            "",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            DeploymentKind::Singleton,
            "tx-0x01",
        );
        assert_eq!(
            describe(&deployment),
            "default/1/Counter  0x5fbdb2315678afecb367f032d93f642f64180aa3  SINGLETON"
        );

        deployment.fork = true;
        assert!(describe(&deployment).ends_with("[fork]"));
    }
}
