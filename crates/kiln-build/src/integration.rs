//! Host project integration
//!
//! After a successful build, every root target is pointed at the artifacts of
//! the libraries it needs. The host project format is owned by a
//! [`ProjectIntegrator`]; this crate only ever writes through it.

use crate::builder::BuildReport;
use crate::cache::copy_artifact;
use crate::error::{BuildError, BuildResult};
use kiln_package::{DependencyGraph, RootTarget};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output sink for artifact references
pub trait ProjectIntegrator {
    fn add_artifact_reference(
        &mut self,
        project: &Path,
        target: &RootTarget,
        artifact: &Path,
    ) -> BuildResult<()>;

    /// Called once after every reference was added
    fn finish(&mut self, _project: &Path) -> BuildResult<()> {
        Ok(())
    }
}

/// Reference every artifact each root target needs, in build order
///
/// Returns the number of references added.
pub fn integrate(
    report: &BuildReport,
    graph: &DependencyGraph,
    project: &Path,
    sink: &mut dyn ProjectIntegrator,
) -> BuildResult<usize> {
    let mut count = 0;
    for root in graph.roots() {
        for library in graph.closure(root.dependencies.iter().map(String::as_str)) {
            let artifact = report.artifact(&library, root.platform).ok_or_else(|| {
                BuildError::build_failed(library.clone(), root.platform, "no artifact available")
            })?;
            sink.add_artifact_reference(project, root, artifact)?;
            count += 1;
        }
    }
    sink.finish(project)?;
    info!(references = count, project = %project.display(), "integrated artifacts");
    Ok(count)
}

/// Copies artifacts into `<project>/Dependencies/<platform>/` and records
/// per-target references in `Dependencies/references.json`
#[derive(Debug, Default)]
pub struct DependenciesDirIntegrator {
    references: BTreeMap<String, Vec<String>>,
}

impl DependenciesDirIntegrator {
    pub const DIR: &'static str = "Dependencies";
    pub const REFERENCES_FILE: &'static str = "references.json";

    pub fn new() -> Self {
        Self::default()
    }

    /// References recorded so far, relative to the project
    pub fn references(&self) -> &BTreeMap<String, Vec<String>> {
        &self.references
    }
}

impl ProjectIntegrator for DependenciesDirIntegrator {
    fn add_artifact_reference(
        &mut self,
        project: &Path,
        target: &RootTarget,
        artifact: &Path,
    ) -> BuildResult<()> {
        let name = artifact.file_name().ok_or_else(|| {
            BuildError::CacheError(format!("artifact path {} has no file name", artifact.display()))
        })?;
        let relative = PathBuf::from(Self::DIR)
            .join(target.platform.as_str())
            .join(name);
        let dest = project.join(&relative);

        let refs = self.references.entry(target.name.clone()).or_default();
        let reference = relative.to_string_lossy().replace('\\', "/");
        if refs.contains(&reference) {
            return Ok(());
        }

        // Two targets on one platform share the copy.
        if !self.references.values().flatten().any(|r| *r == reference) {
            if dest.is_dir() {
                fs::remove_dir_all(&dest).map_err(|e| BuildError::io(&dest, e))?;
            } else if dest.exists() {
                fs::remove_file(&dest).map_err(|e| BuildError::io(&dest, e))?;
            }
            copy_artifact(artifact, &dest)?;
            debug!(target = %target.name, artifact = %dest.display(), "copied artifact");
        }

        self.references
            .entry(target.name.clone())
            .or_default()
            .push(reference);
        Ok(())
    }

    fn finish(&mut self, project: &Path) -> BuildResult<()> {
        let dir = project.join(Self::DIR);
        fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
        let path = dir.join(Self::REFERENCES_FILE);
        let content = serde_json::to_string_pretty(&self.references)
            .map_err(|e| BuildError::CacheError(e.to_string()))?;
        fs::write(&path, content).map_err(|e| BuildError::io(&path, e))
    }
}
