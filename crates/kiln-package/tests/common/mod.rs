#![allow(dead_code)]

use kiln_package::{CheckoutManager, RevisionSpec, SourceLocation, VcsError, VersionControl};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Repo {
    tags: BTreeMap<String, String>,
    branches: BTreeMap<String, String>,
    files: HashMap<String, Vec<(String, String)>>,
}

/// In-memory repositories keyed by source identity
#[derive(Default)]
pub struct FakeVcs {
    repos: Mutex<HashMap<String, Repo>>,
    checkouts: AtomicUsize,
    lookups: AtomicUsize,
}

fn identity(url: &str) -> String {
    SourceLocation::parse(url).unwrap().identity().to_string()
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn tag(&self, url: &str, tag: &str, commit: &str) {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.entry(identity(url)).or_default();
        repo.tags.insert(tag.to_string(), commit.to_string());
        repo.files.entry(commit.to_string()).or_default();
    }

    pub fn branch(&self, url: &str, branch: &str, commit: &str) {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.entry(identity(url)).or_default();
        repo.branches.insert(branch.to_string(), commit.to_string());
        repo.files.entry(commit.to_string()).or_default();
    }

    /// Add a file that every checkout of `commit` contains
    pub fn file(&self, url: &str, commit: &str, path: &str, content: &str) {
        let mut repos = self.repos.lock().unwrap();
        repos
            .entry(identity(url))
            .or_default()
            .files
            .entry(commit.to_string())
            .or_default()
            .push((path.to_string(), content.to_string()));
    }

    pub fn manifest(&self, url: &str, commit: &str, content: &str) {
        self.file(url, commit, "kiln.toml", content);
    }

    pub fn checkout_count(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl VersionControl for FakeVcs {
    fn tags(&self, location: &SourceLocation) -> Result<Vec<String>, VcsError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let repos = self.repos.lock().unwrap();
        let repo = repos
            .get(location.identity())
            .ok_or_else(|| VcsError::Failed(format!("repository {} not found", location)))?;
        Ok(repo.tags.keys().cloned().collect())
    }

    fn resolve_latest(
        &self,
        location: &SourceLocation,
        spec: &RevisionSpec,
    ) -> Result<String, VcsError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let repos = self.repos.lock().unwrap();
        let repo = repos
            .get(location.identity())
            .ok_or_else(|| VcsError::Failed(format!("repository {} not found", location)))?;
        let found = match spec {
            RevisionSpec::Tag(tag) => repo.tags.get(tag).cloned(),
            RevisionSpec::Branch(branch) => repo.branches.get(branch).cloned(),
            RevisionSpec::Commit(commit) => repo
                .files
                .keys()
                .find(|c| c.starts_with(commit.as_str()))
                .cloned(),
        };
        found.ok_or_else(|| VcsError::RevisionNotFound {
            revision: spec.to_string(),
        })
    }

    fn checkout(
        &self,
        location: &SourceLocation,
        spec: &RevisionSpec,
        destination: &Path,
    ) -> Result<String, VcsError> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        let commit = self.resolve_latest(location, spec)?;
        let repos = self.repos.lock().unwrap();
        let files = repos
            .get(location.identity())
            .and_then(|r| r.files.get(&commit))
            .cloned()
            .unwrap_or_default();

        fs::create_dir_all(destination).map_err(|e| VcsError::Failed(e.to_string()))?;
        for (path, content) in files {
            let target = destination.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| VcsError::Failed(e.to_string()))?;
            }
            fs::write(target, content).map_err(|e| VcsError::Failed(e.to_string()))?;
        }
        Ok(commit)
    }
}

pub fn checkouts(root: &Path, vcs: &Arc<FakeVcs>) -> CheckoutManager {
    CheckoutManager::new(root, vcs.clone() as Arc<dyn VersionControl>)
}
