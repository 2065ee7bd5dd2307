//! Deterministic checkouts
//!
//! Every (source location, commit) pair maps to one directory under the
//! checkout root. A marker file records the commit a directory holds so a
//! matching checkout is reused without touching the repository again.

use crate::constraint::{commits_match, RevisionSpec, ResolvedRevision};
use crate::manifest::is_path_segment;
use crate::source::SourceLocation;
use crate::vcs::VersionControl;
use crate::{PackageError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Marker file written into a completed checkout
pub const CHECKOUT_MARKER: &str = ".kiln-checkout";

const STAGING_DIR: &str = ".staging";

static STAGING_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A source location checked out at a resolved revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub location: SourceLocation,
    pub revision: ResolvedRevision,
    pub checkout_path: PathBuf,
}

impl ResolvedPackage {
    /// Commit the checkout holds
    pub fn commit(&self) -> &str {
        &self.revision.commit
    }
}

/// Manages checkouts below a root directory
#[derive(Clone)]
pub struct CheckoutManager {
    root: PathBuf,
    vcs: Arc<dyn VersionControl>,
}

impl std::fmt::Debug for CheckoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutManager")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl CheckoutManager {
    pub fn new(root: impl Into<PathBuf>, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            root: root.into(),
            vcs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vcs(&self) -> &dyn VersionControl {
        self.vcs.as_ref()
    }

    /// `<root>/<stem>-<identity hash>/<commit>`
    pub fn checkout_path(&self, location: &SourceLocation, commit: &str) -> PathBuf {
        let stem: String = location
            .stem()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.root
            .join(format!("{}-{}", stem, location.identity_hash()))
            .join(commit)
    }

    /// Whether `path` is a complete checkout of `commit`
    pub fn is_current(path: &Path, commit: &str) -> bool {
        fs::read_to_string(path.join(CHECKOUT_MARKER))
            .map(|recorded| recorded.trim() == commit)
            .unwrap_or(false)
    }

    /// Make sure a checkout of `revision` exists and return it
    ///
    /// Existing checkouts with a matching marker are left untouched. New
    /// checkouts are staged in a scratch directory and renamed into place once
    /// the marker is written.
    pub fn ensure(
        &self,
        location: &SourceLocation,
        revision: &ResolvedRevision,
    ) -> Result<ResolvedPackage> {
        if !is_path_segment(&revision.commit) {
            return Err(PackageError::CheckoutFailed {
                location: location.to_string(),
                revision: revision.to_string(),
                reason: format!("'{}' is not a usable commit id", revision.commit),
            });
        }
        let path = self.checkout_path(location, &revision.commit);
        let package = ResolvedPackage {
            location: location.clone(),
            revision: revision.clone(),
            checkout_path: path.clone(),
        };

        if Self::is_current(&path, &revision.commit) {
            debug!(%location, commit = %revision.commit, "reusing checkout");
            return Ok(package);
        }

        let staging = self.staging_path(location);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        if let Some(parent) = staging.parent() {
            fs::create_dir_all(parent)?;
        }

        let spec = RevisionSpec::Commit(revision.commit.clone());
        let checked_out = match self.vcs.checkout(location, &spec, &staging) {
            Ok(commit) => commit,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(err.into_package_error(location, &revision.to_string()));
            }
        };

        if !commits_match(&checked_out, &revision.commit) {
            let _ = fs::remove_dir_all(&staging);
            return Err(PackageError::CheckoutFailed {
                location: location.to_string(),
                revision: revision.to_string(),
                reason: format!("checked out {} instead", checked_out),
            });
        }

        fs::write(staging.join(CHECKOUT_MARKER), &revision.commit)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }

        if let Err(err) = fs::rename(&staging, &path) {
            let _ = fs::remove_dir_all(&staging);
            // Another process may have finished the same checkout first.
            if !Self::is_current(&path, &revision.commit) {
                return Err(err.into());
            }
        }

        info!(%location, %revision, path = %path.display(), "checked out");
        Ok(package)
    }

    fn staging_path(&self, location: &SourceLocation) -> PathBuf {
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root.join(STAGING_DIR).join(format!(
            "{}-{}-{}",
            location.identity_hash(),
            std::process::id(),
            n
        ))
    }
}
