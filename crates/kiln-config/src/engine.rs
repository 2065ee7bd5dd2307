//! Resolved engine configuration
//!
//! [`EngineConfig`] is the one value every stage receives explicitly. Nothing
//! in kiln reads process-wide state after the loader has produced it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default validity window for artifacts built from a branch tip
pub const DEFAULT_BRANCH_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Command whose first output line identifies the toolchain
pub const DEFAULT_TOOLCHAIN_COMMAND: &str = "swift --version";

/// Build mode an artifact is compiled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildConfiguration {
    Debug,
    #[default]
    Release,
}

impl BuildConfiguration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            _ => Err(format!("Unknown build configuration: {}", s)),
        }
    }
}

/// Fully resolved configuration for one kiln run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Local artifact cache directory
    pub cache_dir: PathBuf,
    /// Optional second cache consulted after a local miss
    pub shared_cache_dir: Option<PathBuf>,
    /// Toolchain version recorded in every cache key
    ///
    /// `None` until configured or detected with `toolchain_command`.
    pub toolchain_version: Option<String>,
    /// Command run to detect the toolchain version
    pub toolchain_command: String,
    /// Build mode recorded in every cache key
    pub configuration: BuildConfiguration,
    /// Worker pool size for the build orchestrator
    pub jobs: usize,
    /// Total artifact bytes the local cache may hold
    pub cache_size_limit: Option<u64>,
    /// How long an artifact built from a branch tip stays valid
    pub branch_max_age: Duration,
    /// Keep building independent libraries after a failure
    pub keep_going: bool,
    /// Build command template for the command build tool
    pub build_command: Option<String>,
}

impl EngineConfig {
    /// Create a configuration with defaults for everything but the cache location
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            shared_cache_dir: None,
            toolchain_version: None,
            toolchain_command: DEFAULT_TOOLCHAIN_COMMAND.to_string(),
            configuration: BuildConfiguration::default(),
            jobs: default_jobs(),
            cache_size_limit: None,
            branch_max_age: DEFAULT_BRANCH_MAX_AGE,
            keep_going: false,
            build_command: None,
        }
    }

    pub fn with_toolchain(mut self, toolchain: impl Into<String>) -> Self {
        self.toolchain_version = Some(toolchain.into());
        self
    }

    pub fn with_toolchain_command(mut self, command: impl Into<String>) -> Self {
        self.toolchain_command = command.into();
        self
    }

    pub fn with_configuration(mut self, configuration: BuildConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_shared_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_cache_dir = Some(dir.into());
        self
    }

    pub fn with_cache_size_limit(mut self, limit: u64) -> Self {
        self.cache_size_limit = Some(limit);
        self
    }

    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }
}

/// Number of workers when none is configured
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
