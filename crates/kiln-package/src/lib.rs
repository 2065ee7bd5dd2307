//! Kiln package management
//!
//! Manifest model for kiln.toml files, version resolution against upstream
//! repositories, deterministic checkouts, dependency graph construction and
//! lockfile generation.

pub mod checkout;
pub mod constraint;
pub mod graph;
pub mod lockfile;
pub mod manifest;
pub mod resolver;
pub mod source;
pub mod template;
pub mod vcs;

pub use checkout::{CheckoutManager, ResolvedPackage, CHECKOUT_MARKER};
pub use constraint::{RevisionSpec, ResolvedRevision, VersionConstraint, VersionRange};
pub use graph::{DependencyGraph, GraphBuilder, LibraryNode, RootTarget};
pub use lockfile::{LockedPackage, Lockfile, LOCKFILE};
pub use manifest::{
    is_path_segment, Library, Manifest, PackageReference, Platform, Target, TargetKind, MANIFEST_FILE,
};
pub use resolver::{Requirement, Resolution, Resolver, VersionResolver};
pub use source::SourceLocation;
pub use template::ManifestTemplate;
pub use vcs::{GitCli, VcsError, VersionControl};

/// Package management errors
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Conflicting pins for '{location}': {}", .pins.join(" vs "))]
    ConflictingPins { location: String, pins: Vec<String> },

    #[error("No revision of '{location}' satisfies constraints: {}", .constraints.join(", "))]
    UnsatisfiableConstraints {
        location: String,
        constraints: Vec<String>,
    },

    #[error("Checkout of '{location}' at {revision} failed: {reason}")]
    CheckoutFailed {
        location: String,
        revision: String,
        reason: String,
    },

    #[error("Revision {revision} of '{location}' not found")]
    RevisionNotFound { location: String, revision: String },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Missing dependency '{name}' required by '{required_by}'")]
    MissingDependency { name: String, required_by: String },

    #[error("Library '{name}' is exposed by more than one package: {}", .packages.join(", "))]
    DuplicateLibraryName { name: String, packages: Vec<String> },

    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid lockfile: {0}")]
    InvalidLockfile(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;
