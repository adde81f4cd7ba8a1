//! Project configuration (moonbind.toml)
//!
//! ```toml
//! [project]
//! root = "scripts"
//! main = "res://main.lua"
//!
//! [engine]
//! default_base = "Node"
//! instruction_limit = 1000000
//! ```

use std::path::{Path, PathBuf};

use moonbind_engine::EngineOptions;
use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Default values for [`RuntimeConfig`]
pub mod defaults {
    /// Configuration file name looked up in the working directory
    pub const CONFIG_FILE: &str = "moonbind.toml";
    /// Project root, relative to the configuration file
    pub const PROJECT_ROOT: &str = ".";
}

/// Project settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory `res://` paths resolve under
    pub root: PathBuf,
    /// Script `moonbind run` uses when none is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(defaults::PROJECT_ROOT),
            main: None,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Project settings
    pub project: ProjectConfig,
    /// Engine options
    pub engine: EngineOptions,
}

impl RuntimeConfig {
    /// Parse a configuration file. A relative project root is taken
    /// relative to the file's directory.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        if config.project.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.project.root = base.join(&config.project.root);
        }
        Ok(config)
    }

    /// Parse configuration text
    pub fn from_str(content: &str) -> RuntimeResult<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `moonbind.toml` from `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> RuntimeResult<Self> {
        let path = dir.join(defaults::CONFIG_FILE);
        if path.is_file() {
            return Self::from_file(&path);
        }
        Ok(Self {
            project: ProjectConfig {
                root: dir.to_path_buf(),
                main: None,
            },
            engine: EngineOptions::default(),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.engine.script_root.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "engine.script_root cannot be empty".to_string(),
            ));
        }
        if self.engine.default_base.is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "engine.default_base cannot be empty".to_string(),
            ));
        }
        if self.engine.watchdog_interval == 0 {
            return Err(RuntimeError::InvalidConfig(
                "engine.watchdog_interval must be positive".to_string(),
            ));
        }
        if self.engine.instruction_limit == Some(0) {
            return Err(RuntimeError::InvalidConfig(
                "engine.instruction_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
