//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::engine::{BuildConfiguration, EngineConfig, DEFAULT_BRANCH_MAX_AGE};
use crate::global::GlobalConfig;
use crate::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.kiln/config.toml) - lowest priority
/// 2. Environment variables (KILN_*) - overrides global
/// 3. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Explicit global config path (defaults to ~/.kiln/config.toml)
    global_config_path: Option<PathBuf>,
    /// Environment override; `None` reads the process environment
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
            env: None,
        }
    }

    /// Read the global configuration from a specific file
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Use the given variables instead of the process environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Load and resolve the engine configuration
    pub fn load(&self) -> ConfigResult<EngineConfig> {
        let global = self.load_global_config()?;
        let config = Self::resolve(&global)?;
        self.apply_env_overrides(config)
    }

    /// Load global configuration; a missing file yields the defaults
    pub fn load_global_config(&self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => path,
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Turn a global config into an engine config, filling in defaults
    pub fn resolve(global: &GlobalConfig) -> ConfigResult<EngineConfig> {
        let cache = global.cache.clone().unwrap_or_default();
        let build = global.build.clone().unwrap_or_default();

        let cache_dir = match cache.path {
            Some(path) => path,
            None => default_cache_dir()?,
        };

        let mut config = EngineConfig::new(cache_dir);
        config.shared_cache_dir = cache.shared_path;
        config.cache_size_limit = cache.max_size;
        config.branch_max_age = cache
            .branch_max_age
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BRANCH_MAX_AGE);

        if let Some(jobs) = build.jobs {
            config.jobs = jobs;
        }
        if build.toolchain.is_some() {
            config.toolchain_version = build.toolchain;
        }
        if let Some(command) = build.toolchain_command {
            config.toolchain_command = command;
        }
        if let Some(configuration) = build.configuration {
            config.configuration = configuration;
        }
        config.keep_going = build.keep_going.unwrap_or(false);
        config.build_command = build.command;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Recognised variables: KILN_CACHE_DIR, KILN_SHARED_CACHE_DIR, KILN_JOBS,
    /// KILN_TOOLCHAIN, KILN_TOOLCHAIN_COMMAND, KILN_CONFIGURATION
    fn apply_env_overrides(&self, mut config: EngineConfig) -> ConfigResult<EngineConfig> {
        if let Some(dir) = self.var("KILN_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }

        if let Some(dir) = self.var("KILN_SHARED_CACHE_DIR") {
            config.shared_cache_dir = Some(PathBuf::from(dir));
        }

        if let Some(jobs) = self.var("KILN_JOBS") {
            let parsed = jobs.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "KILN_JOBS".to_string(),
                    reason: format!("expected a positive integer, got '{}'", jobs),
                }
            })?;
            config.jobs = parsed;
        }

        if let Some(toolchain) = self.var("KILN_TOOLCHAIN") {
            config.toolchain_version = Some(toolchain);
        }

        if let Some(command) = self.var("KILN_TOOLCHAIN_COMMAND") {
            config.toolchain_command = command;
        }

        if let Some(configuration) = self.var("KILN_CONFIGURATION") {
            config.configuration = configuration
                .parse::<BuildConfiguration>()
                .map_err(|reason| ConfigError::InvalidValue {
                    field: "KILN_CONFIGURATION".to_string(),
                    reason,
                })?;
        }

        Ok(config)
    }

    fn var(&self, key: &str) -> Option<String> {
        let value = match &self.env {
            Some(vars) => vars.get(key).cloned(),
            None => env::var(key).ok(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Get the global configuration directory (~/.kiln)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".kiln"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Default local cache location (platform cache dir, e.g. ~/.cache/kiln/artifacts)
pub fn default_cache_dir() -> ConfigResult<PathBuf> {
    if let Some(dir) = dirs::cache_dir() {
        return Ok(dir.join("kiln").join("artifacts"));
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(".kiln").join("artifacts"))
}

/// Write a global config file, creating the parent directory
pub fn write_global_config(path: &Path, config: &GlobalConfig) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue {
        field: path.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, content)?;
    Ok(())
}
