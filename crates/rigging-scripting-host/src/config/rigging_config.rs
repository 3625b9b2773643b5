use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::paths::{APP_NAME, ProjectPaths};
use super::scripting_config::ScriptingConfig;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiggingConfig {
    /// Scripting configuration
    #[serde(default)]
    pub scripting: ScriptingConfig,
}

impl RiggingConfig {
    /// Default location of `config.toml`
    pub fn config_path() -> PathBuf {
        ProjectPaths::new(APP_NAME)
            .map(|paths| paths.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("rigging.toml"))
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like [`load_from`](Self::load_from) but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigLoadError> {
        match Self::load_from(path) {
            Err(ConfigLoadError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
