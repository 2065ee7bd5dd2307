//! Package lockfile (kiln.lock) for reproducible resolution

use crate::constraint::{parse_tag_version, RevisionSpec, ResolvedRevision};
use crate::source::SourceLocation;
use crate::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// File name of the lockfile, next to the manifest
pub const LOCKFILE: &str = "kiln.lock";

/// Lockfile structure (kiln.lock)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lockfile {
    /// Lockfile format version
    pub version: u32,
    /// Resolved packages, sorted by identity
    #[serde(default)]
    pub packages: Vec<LockedPackage>,
    #[serde(default)]
    pub metadata: LockfileMetadata,
}

impl Lockfile {
    /// Current lockfile format version
    pub const VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            packages: Vec::new(),
            metadata: LockfileMetadata::default(),
        }
    }

    /// Parse lockfile from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let lockfile: Self = toml::from_str(content)?;
        lockfile.verify()?;
        Ok(lockfile)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load `kiln.lock` from a project directory, if present
    pub fn from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LOCKFILE);
        if !path.exists() {
            return Ok(None);
        }
        Self::from_file(&path).map(Some)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Add or replace a locked package
    pub fn add_package(&mut self, package: LockedPackage) {
        self.packages.retain(|p| p.identity != package.identity);
        self.packages.push(package);
        self.packages.sort_by(|a, b| a.identity.cmp(&b.identity));
    }

    /// Locked entry for a source location
    pub fn find(&self, location: &SourceLocation) -> Option<&LockedPackage> {
        self.packages
            .iter()
            .find(|p| p.identity == location.identity())
    }

    /// Verify lockfile integrity
    pub fn verify(&self) -> Result<()> {
        if self.version > Self::VERSION {
            return Err(PackageError::InvalidLockfile(format!(
                "lockfile version {} is newer than supported version {}",
                self.version,
                Self::VERSION
            )));
        }

        let mut seen = HashSet::new();
        for pkg in &self.packages {
            if !seen.insert(pkg.identity.as_str()) {
                return Err(PackageError::InvalidLockfile(format!(
                    "duplicate package in lockfile: {}",
                    pkg.url
                )));
            }
        }

        Ok(())
    }
}

impl Default for Lockfile {
    fn default() -> Self {
        Self::new()
    }
}

/// Locked package entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedPackage {
    /// Source location as written in the manifest
    pub url: String,
    /// Normalized identity of the location
    pub identity: String,
    /// `tag`, `branch` or `commit`
    pub kind: String,
    /// Tag or branch name, or the commit for commit pins
    pub reference: String,
    /// Resolved commit
    pub commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl LockedPackage {
    pub fn from_resolved(location: &SourceLocation, revision: &ResolvedRevision) -> Self {
        Self {
            url: location.as_str().to_string(),
            identity: location.identity().to_string(),
            kind: revision.spec.kind().to_string(),
            reference: revision.spec.name().to_string(),
            commit: revision.commit.clone(),
            version: revision.version.as_ref().map(|v| v.to_string()),
        }
    }

    /// The revision this entry records; unknown kinds fall back to the commit
    pub fn to_revision(&self) -> ResolvedRevision {
        let spec = match self.kind.as_str() {
            "tag" => RevisionSpec::Tag(self.reference.clone()),
            "branch" => RevisionSpec::Branch(self.reference.clone()),
            _ => RevisionSpec::Commit(self.commit.clone()),
        };
        let mut revision = ResolvedRevision::new(spec, self.commit.clone());
        if revision.version.is_none() && matches!(revision.spec, RevisionSpec::Tag(_)) {
            revision.version = self.version.as_deref().and_then(parse_tag_version);
        }
        revision
    }
}

/// Lockfile metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LockfileMetadata {
    /// When lockfile was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    /// Kiln version used to generate lockfile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kiln_version: Option<String>,
}
