//! Pin agreement checks for one source location

use super::Requirement;
use crate::constraint::{commits_match, VersionConstraint};
use crate::source::SourceLocation;
use crate::PackageError;

/// Tag and commit pins collected from a group of requirements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinSet {
    /// Distinct tag pins
    pub tags: Vec<String>,
    /// Distinct commit pins; abbreviations are merged into the longest form
    pub commits: Vec<String>,
}

impl PinSet {
    pub fn collect(requirements: &[Requirement]) -> Self {
        let mut pins = Self::default();
        for requirement in requirements {
            match &requirement.constraint {
                VersionConstraint::Tag(tag) => {
                    if !pins.tags.contains(tag) {
                        pins.tags.push(tag.clone());
                    }
                }
                VersionConstraint::Commit(commit) => pins.add_commit(commit),
                VersionConstraint::Range(_) | VersionConstraint::Branch(_) => {}
            }
        }
        pins.tags.sort();
        pins.commits.sort();
        pins
    }

    fn add_commit(&mut self, commit: &str) {
        if let Some(existing) = self.commits.iter_mut().find(|c| commits_match(c, commit)) {
            if commit.len() > existing.len() {
                *existing = commit.to_string();
            }
            return;
        }
        self.commits.push(commit.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.commits.is_empty()
    }

    /// Reject pins that disagree without asking the repository
    pub fn check_textual(&self, location: &SourceLocation) -> Result<(), PackageError> {
        if self.commits.len() > 1 {
            return Err(conflicting_pins(
                location,
                self.commits.iter().map(|c| format!("commit {}", c)),
            ));
        }
        if self.tags.len() > 1 {
            return Err(conflicting_pins(
                location,
                self.tags.iter().map(|t| format!("tag {}", t)),
            ));
        }
        Ok(())
    }

    pub fn tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    pub fn commit(&self) -> Option<&str> {
        self.commits.first().map(String::as_str)
    }
}

pub fn conflicting_pins(
    location: &SourceLocation,
    pins: impl IntoIterator<Item = String>,
) -> PackageError {
    PackageError::ConflictingPins {
        location: location.to_string(),
        pins: pins.into_iter().collect(),
    }
}

/// Error naming every constraint in the group and who declared it
pub fn unsatisfiable(location: &SourceLocation, requirements: &[Requirement]) -> PackageError {
    PackageError::UnsatisfiableConstraints {
        location: location.to_string(),
        constraints: requirements.iter().map(|r| r.to_string()).collect(),
    }
}
