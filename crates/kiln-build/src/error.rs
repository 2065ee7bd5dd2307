/// Build system error types
use kiln_package::{PackageError, Platform};
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build of '{library}' for {platform} failed: {reason}")]
    BuildFailed {
        library: String,
        platform: Platform,
        reason: String,
    },

    #[error("Build tool failed: {0}")]
    ToolFailed(String),

    #[error("Toolchain version is unknown; set [build] toolchain or a working toolchain-command")]
    ToolchainUnknown,

    #[error("Artifact cache is corrupt: {0}")]
    CacheCorrupt(String),

    #[error("Build cache error: {0}")]
    CacheError(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Create a build failure for one library and platform
    pub fn build_failed(library: impl Into<String>, platform: Platform, reason: impl ToString) -> Self {
        Self::BuildFailed {
            library: library.into(),
            platform,
            reason: reason.to_string(),
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create a corrupt-cache error
    pub fn corrupt(reason: impl ToString) -> Self {
        Self::CacheCorrupt(reason.to_string())
    }
}
