//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub admin: AdminConfig,
    /// Subsystems seeded into the store at startup
    #[serde(default, rename = "subsystem")]
    pub subsystems: Vec<SubsystemConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bind address for the admin server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8760".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemConfig {
    /// Subsystem name
    pub name: String,
    /// Hardware description directory for this subsystem
    pub hw_desc_dir: String,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
