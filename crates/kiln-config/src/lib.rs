//! Kiln Configuration System
//!
//! Provides configuration management for kiln runs:
//! - Global user configuration (~/.kiln/config.toml)
//! - Environment variable overrides (KILN_*)
//! - The resolved [`EngineConfig`] that is threaded through resolution,
//!   checkout, caching and building
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config (~/.kiln/config.toml)
//! 3. Environment variables (KILN_*)
//! 4. CLI flags (applied by the caller on the returned [`EngineConfig`])
//!
//! # Example
//!
//! ```no_run
//! use kiln_config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().unwrap();
//! println!("cache at {}", config.cache_dir.display());
//! ```

pub mod engine;
pub mod global;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use engine::{BuildConfiguration, EngineConfig, DEFAULT_TOOLCHAIN_COMMAND};
pub use global::GlobalConfig;
pub use loader::ConfigLoader;
