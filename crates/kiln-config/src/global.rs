//! Global Configuration (~/.kiln/config.toml)
//!
//! Handles user-level configuration stored in `~/.kiln/config.toml`.

use crate::engine::BuildConfiguration;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.kiln/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Artifact cache settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,

    /// Build settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,
}

/// `[cache]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct CacheSection {
    /// Local cache directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Cache directory shared between machines or users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_path: Option<PathBuf>,

    /// Upper bound on the total artifact size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,

    /// Seconds an artifact built from a branch tip stays valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_max_age: Option<u64>,
}

/// `[build]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BuildSection {
    /// Maximum number of concurrent builds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    /// Toolchain version artifacts are built with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,

    /// Command that prints the toolchain version when `toolchain` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain_command: Option<String>,

    /// Build configuration ("debug" or "release")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<BuildConfiguration>,

    /// Keep building independent libraries after a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_going: Option<bool>,

    /// Build command template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(build) = &self.build {
            if build.jobs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "build.jobs".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
            let fields = [
                ("build.toolchain", &build.toolchain),
                ("build.toolchain-command", &build.toolchain_command),
            ];
            for (field, value) in fields {
                if value.as_ref().is_some_and(|v| v.trim().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
        }

        if let Some(cache) = &self.cache {
            if cache.max_size == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "cache.max-size".to_string(),
                    reason: "must be greater than zero (omit it for no limit)".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the global config file path (~/.kiln/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".kiln").join("config.toml"))
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.cache.is_some() {
            self.cache = other.cache.clone();
        }
        if other.build.is_some() {
            self.build = other.build.clone();
        }
    }
}
