//! Configuration handling for duck.
//!
//! Settings live in `ducktail.toml` at the workspace root. Every field has a
//! default, and a missing file means all defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ducktail_core::error::DuckError;
use ducktail_core::inspection::InspectionSettings;

/// File name looked up in the workspace root.
pub const CONFIG_FILE: &str = "ducktail.toml";

/// Project name used when the configuration does not give one.
pub const DEFAULT_PROJECT: &str = "VBAProject";

/// Errors reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl From<ConfigError> for DuckError {
    fn from(err: ConfigError) -> Self {
        DuckError::InvalidArguments {
            message: err.to_string(),
            details: None,
        }
    }
}

/// Duck configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    /// Library references beyond the built-in `VBA` library.
    #[serde(default)]
    pub references: Vec<ReferenceConfig>,

    #[serde(default)]
    pub inspections: InspectionSettings,
}

/// The project the workspace's modules belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
}

/// One `[[references]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub name: String,

    /// Type library file; empty for libraries known by name.
    #[serde(default)]
    pub path: String,

    /// Lower resolves first.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_project_name() -> String {
    DEFAULT_PROJECT.to_string()
}

fn default_priority() -> u32 {
    100
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `ducktail.toml` from `root`, or defaults when there is none.
    pub fn load_from_workspace(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// References in the order they should be registered.
    pub fn ordered_references(&self) -> Vec<&ReferenceConfig> {
        let mut references: Vec<&ReferenceConfig> = self.references.iter().collect();
        references.sort_by_key(|r| r.priority);
        references
    }
}
