//! Cache keys and build units

use kiln_config::BuildConfiguration;
use kiln_package::{LibraryNode, Platform};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifies one buildable artifact
///
/// Any change in library, revision, platform, toolchain or configuration is a
/// different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub library: String,
    /// Commit the library was built from
    pub revision: String,
    pub platform: Platform,
    pub toolchain: String,
    pub configuration: BuildConfiguration,
}

impl CacheKey {
    pub fn new(
        library: impl Into<String>,
        revision: impl Into<String>,
        platform: Platform,
        toolchain: impl Into<String>,
        configuration: BuildConfiguration,
    ) -> Self {
        Self {
            library: library.into(),
            revision: revision.into(),
            platform,
            toolchain: toolchain.into(),
            configuration,
        }
    }

    /// Stable hex digest used for on-disk names and index keys
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.library.as_str(),
            self.revision.as_str(),
            self.platform.as_str(),
            self.toolchain.as_str(),
            self.configuration.as_str(),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{} {} {}]",
            self.library, self.revision, self.platform, self.toolchain, self.configuration
        )
    }
}

/// One library built for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub node: LibraryNode,
    pub platform: Platform,
    /// Indices of the units this one depends on
    pub dependencies: Vec<usize>,
}

impl BuildUnit {
    pub fn library(&self) -> &str {
        &self.node.name
    }

    pub fn cache_key(&self, toolchain: &str, configuration: BuildConfiguration) -> CacheKey {
        CacheKey::new(
            self.node.name.clone(),
            self.node.package.commit(),
            self.platform,
            toolchain,
            configuration,
        )
    }
}

impl fmt::Display for BuildUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.node.name, self.platform)
    }
}
