//! Config store for loading and saving treb.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{TrebConfig, parser};

pub const CONFIG_FILE_NAME: &str = "treb.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn for_project(project_root: &Path) -> Self {
        Self::from_path(project_root.join(CONFIG_FILE_NAME))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> anyhow::Result<TrebConfig> {
        if !self.config_path.exists() {
            return Ok(TrebConfig::new());
        }
        parser::parse_treb_toml(&self.config_path)
    }

    pub fn save(&self, config: &TrebConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
