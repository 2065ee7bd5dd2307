//! Version-control collaborator
//!
//! The engine never talks to a repository directly. Everything goes through
//! [`VersionControl`], which [`GitCli`] implements by spawning `git`.

use crate::constraint::RevisionSpec;
use crate::source::SourceLocation;
use crate::PackageError;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;
use tracing::debug;

/// Errors reported by a version-control implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VcsError {
    #[error("revision {revision} does not exist")]
    RevisionNotFound { revision: String },

    #[error("{0}")]
    Failed(String),
}

impl VcsError {
    pub(crate) fn into_package_error(self, location: &SourceLocation, revision: &str) -> PackageError {
        match self {
            Self::RevisionNotFound { .. } => PackageError::RevisionNotFound {
                location: location.to_string(),
                revision: revision.to_string(),
            },
            Self::Failed(reason) => PackageError::CheckoutFailed {
                location: location.to_string(),
                revision: revision.to_string(),
                reason,
            },
        }
    }
}

/// Operations the engine needs from a version-control tool
pub trait VersionControl: Send + Sync {
    /// All tag names published by the repository
    fn tags(&self, location: &SourceLocation) -> Result<Vec<String>, VcsError>;

    /// Commit a tag, branch or commit currently points at upstream
    fn resolve_latest(
        &self,
        location: &SourceLocation,
        spec: &RevisionSpec,
    ) -> Result<String, VcsError>;

    /// Check out `spec` into `destination` and return the commit checked out
    fn checkout(
        &self,
        location: &SourceLocation,
        spec: &RevisionSpec,
        destination: &Path,
    ) -> Result<String, VcsError>;
}

/// `git` command-line implementation
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, args: &[&str]) -> Result<Output, VcsError> {
        debug!(program = %self.program.display(), ?args, "running git");
        Command::new(&self.program)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| VcsError::Failed(format!("failed to run {}: {}", self.program.display(), e)))
    }

    fn run_ok(&self, args: &[&str], revision: &str) -> Result<String, VcsError> {
        let output = self.run(args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&stderr, revision))
    }

    fn ls_remote(&self, location: &SourceLocation, refs: &[String]) -> Result<Vec<(String, String)>, VcsError> {
        let mut args = vec!["ls-remote", location.as_str()];
        args.extend(refs.iter().map(String::as_str));
        let stdout = self.run_ok(&args, refs.first().map(String::as_str).unwrap_or(""))?;
        Ok(parse_ls_remote(&stdout))
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionControl for GitCli {
    fn tags(&self, location: &SourceLocation) -> Result<Vec<String>, VcsError> {
        let stdout = self.run_ok(&["ls-remote", "--tags", "--refs", location.as_str()], "tags")?;
        Ok(parse_ls_remote(&stdout)
            .into_iter()
            .filter_map(|(_, name)| name.strip_prefix("refs/tags/").map(str::to_string))
            .collect())
    }

    fn resolve_latest(
        &self,
        location: &SourceLocation,
        spec: &RevisionSpec,
    ) -> Result<String, VcsError> {
        match spec {
            RevisionSpec::Tag(tag) => {
                let plain = format!("refs/tags/{}", tag);
                let peeled = format!("{}^{{}}", plain);
                let refs = self.ls_remote(location, &[plain.clone(), peeled.clone()])?;
                // Annotated tags list the tag object and the peeled commit.
                refs.iter()
                    .find(|(_, name)| *name == peeled)
                    .or_else(|| refs.iter().find(|(_, name)| *name == plain))
                    .map(|(commit, _)| commit.clone())
                    .ok_or_else(|| VcsError::RevisionNotFound {
                        revision: spec.to_string(),
                    })
            }
            RevisionSpec::Branch(branch) => {
                let head = format!("refs/heads/{}", branch);
                self.ls_remote(location, &[head.clone()])?
                    .into_iter()
                    .find(|(_, name)| *name == head)
                    .map(|(commit, _)| commit)
                    .ok_or_else(|| VcsError::RevisionNotFound {
                        revision: spec.to_string(),
                    })
            }
            // Commits cannot be queried remotely without fetching.
            RevisionSpec::Commit(commit) => Ok(commit.clone()),
        }
    }

    fn checkout(
        &self,
        location: &SourceLocation,
        spec: &RevisionSpec,
        destination: &Path,
    ) -> Result<String, VcsError> {
        let dest = destination.to_string_lossy();
        if !destination.join(".git").exists() {
            self.run_ok(
                &["clone", "--quiet", "--no-checkout", location.as_str(), &dest],
                spec.name(),
            )?;
        }

        let target = match spec {
            RevisionSpec::Branch(branch) => format!("origin/{}", branch),
            RevisionSpec::Tag(tag) => format!("refs/tags/{}", tag),
            RevisionSpec::Commit(commit) => commit.clone(),
        };
        self.run_ok(
            &["-C", &dest, "checkout", "--quiet", "--detach", &target],
            &spec.to_string(),
        )?;

        let head = self.run_ok(&["-C", &dest, "rev-parse", "HEAD"], spec.name())?;
        Ok(head.trim().to_string())
    }
}

fn parse_ls_remote(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (commit, name) = line.split_once(char::is_whitespace)?;
            Some((commit.trim().to_string(), name.trim().to_string()))
        })
        .collect()
}

fn classify_failure(stderr: &str, revision: &str) -> VcsError {
    let lower = stderr.to_lowercase();
    let missing = [
        "did not match any",
        "unknown revision",
        "not a valid object name",
        "couldn't find remote ref",
        "reference is not a tree",
    ];
    if missing.iter().any(|pattern| lower.contains(pattern)) {
        VcsError::RevisionNotFound {
            revision: revision.to_string(),
        }
    } else {
        VcsError::Failed(stderr.to_string())
    }
}
