//! Version resolution
//!
//! [`VersionResolver`] picks one revision for a group of constraints on the
//! same source location. [`Resolver`] drives it over the whole transitive
//! package set, checking packages out as it discovers their manifests.

use crate::checkout::{CheckoutManager, ResolvedPackage};
use crate::constraint::{RevisionSpec, ResolvedRevision, VersionConstraint, VersionRange};
use crate::lockfile::{LockedPackage, Lockfile};
use crate::manifest::{Manifest, PackageReference};
use crate::source::SourceLocation;
use crate::vcs::VersionControl;
use crate::{PackageError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

pub mod conflict;
mod version_solver;

pub use conflict::PinSet;
pub use version_solver::{available_versions, max_satisfying_tag};

/// Rounds the transitive driver runs before giving up
pub const MAX_ROUNDS: usize = 32;

/// A constraint together with the project that declared it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub location: SourceLocation,
    pub constraint: VersionConstraint,
    pub required_by: String,
}

impl Requirement {
    pub fn new(
        location: SourceLocation,
        constraint: VersionConstraint,
        required_by: impl Into<String>,
    ) -> Self {
        Self {
            location,
            constraint,
            required_by: required_by.into(),
        }
    }

    pub fn from_reference(reference: &PackageReference, required_by: &str) -> Self {
        Self::new(
            reference.location.clone(),
            reference.constraint.clone(),
            required_by,
        )
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (required by {})", self.constraint, self.required_by)
    }
}

/// Resolves one group of constraints to a concrete revision
pub struct VersionResolver<'a> {
    vcs: &'a dyn VersionControl,
}

impl<'a> VersionResolver<'a> {
    pub fn new(vcs: &'a dyn VersionControl) -> Self {
        Self { vcs }
    }

    /// Pick the revision for `location` satisfying every requirement
    ///
    /// Preference order: pinned tag or commit, then the highest tag inside all
    /// ranges, then a branch tip. A `locked` revision is reused when it is
    /// immutable and still satisfies the group.
    pub fn resolve(
        &self,
        location: &SourceLocation,
        requirements: &[Requirement],
        locked: Option<&ResolvedRevision>,
    ) -> Result<ResolvedRevision> {
        if requirements.is_empty() {
            return Err(conflict::unsatisfiable(location, requirements));
        }

        if let Some(locked) = locked {
            if !locked.is_mutable() && requirements.iter().all(|r| r.constraint.matches(locked)) {
                debug!(%location, revision = %locked, "reusing locked revision");
                return Ok(locked.clone());
            }
        }

        let pins = PinSet::collect(requirements);
        pins.check_textual(location)?;

        let ranges: Vec<&VersionRange> = requirements
            .iter()
            .filter_map(|r| match &r.constraint {
                VersionConstraint::Range(range) => Some(range),
                _ => None,
            })
            .collect();
        let branches: BTreeSet<&str> = requirements
            .iter()
            .filter_map(|r| match &r.constraint {
                VersionConstraint::Branch(branch) => Some(branch.as_str()),
                _ => None,
            })
            .collect();

        if !pins.is_empty() {
            if !branches.is_empty() {
                warn!(%location, ?branches, "pinned revision overrides branch constraints");
            }
            return self.resolve_pinned(location, &pins, &ranges, requirements);
        }

        if !ranges.is_empty() {
            if !branches.is_empty() {
                return Err(conflict::unsatisfiable(location, requirements));
            }
            return self.resolve_range(location, &ranges, requirements);
        }

        let mut branches = branches.into_iter();
        match (branches.next(), branches.next()) {
            (Some(branch), None) => {
                let spec = RevisionSpec::Branch(branch.to_string());
                let commit = self.lookup(location, &spec)?;
                Ok(ResolvedRevision::new(spec, commit))
            }
            _ => Err(conflict::unsatisfiable(location, requirements)),
        }
    }

    fn resolve_pinned(
        &self,
        location: &SourceLocation,
        pins: &PinSet,
        ranges: &[&VersionRange],
        requirements: &[Requirement],
    ) -> Result<ResolvedRevision> {
        let Some(tag) = pins.tag() else {
            // A bare commit carries no version, so ranges cannot rule it out.
            let commit = pins.commit().unwrap_or_default();
            let spec = RevisionSpec::Commit(commit.to_string());
            let resolved = self.lookup(location, &spec)?;
            return Ok(ResolvedRevision::new(spec, resolved));
        };

        let spec = RevisionSpec::Tag(tag.to_string());
        let commit = self.lookup(location, &spec)?;
        let revision = ResolvedRevision::new(spec, commit);

        if let Some(pinned) = pins.commit() {
            if !VersionConstraint::Commit(pinned.to_string()).matches(&revision) {
                return Err(conflict::conflicting_pins(
                    location,
                    [format!("tag {} ({})", tag, revision.commit), format!("commit {}", pinned)],
                ));
            }
        }

        if !ranges.is_empty() {
            let in_range = revision
                .version
                .as_ref()
                .is_some_and(|v| ranges.iter().all(|r| r.matches(v)));
            if !in_range {
                return Err(conflict::unsatisfiable(location, requirements));
            }
        }

        Ok(revision)
    }

    fn resolve_range(
        &self,
        location: &SourceLocation,
        ranges: &[&VersionRange],
        requirements: &[Requirement],
    ) -> Result<ResolvedRevision> {
        let tags = self
            .vcs
            .tags(location)
            .map_err(|e| e.into_package_error(location, "tags"))?;

        let Some((tag, version)) = max_satisfying_tag(&tags, ranges) else {
            debug!(
                %location,
                available = ?available_versions(&tags),
                "no tag satisfies the requested ranges"
            );
            return Err(conflict::unsatisfiable(location, requirements));
        };

        debug!(%location, %tag, %version, "selected highest matching tag");
        let spec = RevisionSpec::Tag(tag);
        let commit = self.lookup(location, &spec)?;
        Ok(ResolvedRevision::new(spec, commit))
    }

    fn lookup(&self, location: &SourceLocation, spec: &RevisionSpec) -> Result<String> {
        self.vcs
            .resolve_latest(location, spec)
            .map_err(|e| e.into_package_error(location, &spec.to_string()))
    }
}

/// Result of a full resolution run
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Resolved packages keyed by source identity
    pub packages: BTreeMap<String, ResolvedPackage>,
    manifests: HashMap<String, Manifest>,
}

impl Resolution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a package and the manifest found in its checkout
    pub fn insert(&mut self, package: ResolvedPackage, manifest: Manifest) {
        let identity = package.location.identity().to_string();
        self.manifests.insert(identity.clone(), manifest);
        self.packages.insert(identity, package);
    }

    pub fn get(&self, location: &SourceLocation) -> Option<&ResolvedPackage> {
        self.packages.get(location.identity())
    }

    /// Manifest of a resolved package
    pub fn manifest(&self, location: &SourceLocation) -> Option<&Manifest> {
        self.manifests.get(location.identity())
    }

    /// Packages with their manifests, ordered by identity
    pub fn iter(&self) -> impl Iterator<Item = (&ResolvedPackage, &Manifest)> {
        self.packages
            .iter()
            .filter_map(|(id, pkg)| self.manifests.get(id).map(|m| (pkg, m)))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Lockfile recording every resolved revision
    pub fn to_lockfile(&self) -> Lockfile {
        let mut lockfile = Lockfile::new();
        for package in self.packages.values() {
            lockfile.add_package(LockedPackage::from_resolved(&package.location, &package.revision));
        }
        lockfile.metadata.kiln_version = Some(env!("CARGO_PKG_VERSION").to_string());
        lockfile.metadata.generated_at =
            Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        lockfile
    }
}

/// Transitive resolution driver
///
/// Runs in rounds. Each round gathers the root's references and those of every
/// package currently resolved, resolves each group, and checks out whatever
/// changed. The run ends once a round changes nothing.
pub struct Resolver<'a> {
    checkouts: &'a CheckoutManager,
    lockfile: Option<&'a Lockfile>,
}

impl<'a> Resolver<'a> {
    pub fn new(checkouts: &'a CheckoutManager) -> Self {
        Self {
            checkouts,
            lockfile: None,
        }
    }

    /// Prefer revisions recorded in a lockfile while they still satisfy
    pub fn with_lockfile(mut self, lockfile: &'a Lockfile) -> Self {
        self.lockfile = Some(lockfile);
        self
    }

    pub fn resolve(&self, root: &Manifest) -> Result<Resolution> {
        let versions = VersionResolver::new(self.checkouts.vcs());
        let mut memo: HashMap<(String, Vec<String>), ResolvedRevision> = HashMap::new();
        let mut resolution = Resolution::new();
        let mut unstable: Option<PackageError> = None;

        for round in 1..=MAX_ROUNDS {
            let groups = collect_requirements(root, &resolution);
            let picks: Vec<(&SourceLocation, &Vec<Requirement>, Result<ResolvedRevision>)> = groups
                .iter()
                .map(|(identity, (location, requirements))| {
                    let revision = self.pick(&versions, &mut memo, identity, location, requirements);
                    (location, requirements, revision)
                })
                .collect();

            // Requirements only loosen when a package already in the set moves
            // to another revision or drops out.
            let moving = resolution.packages.keys().any(|identity| !groups.contains_key(identity))
                || picks.iter().any(|(location, _, revision)| match (revision, resolution.get(location)) {
                    (Ok(revision), Some(current)) => current.revision.commit != revision.commit,
                    _ => false,
                });

            let mut next = Resolution::new();
            let mut changed = groups.len() != resolution.len();
            for (location, requirements, revision) in picks {
                let revision = match revision {
                    Ok(revision) => revision,
                    Err(err) if moving && is_constraint_error(&err) => {
                        debug!(%location, error = %err, "constraints may be stale, retrying next round");
                        if let Some(current) = resolution.get(location) {
                            let manifest = resolution
                                .manifest(location)
                                .cloned()
                                .unwrap_or_else(|| Manifest::implicit(location.stem()));
                            next.insert(current.clone(), manifest);
                        }
                        changed = true;
                        unstable = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let current = resolution
                    .get(location)
                    .filter(|pkg| pkg.revision.commit == revision.commit)
                    .cloned();
                match current {
                    Some(package) => {
                        let manifest = resolution
                            .manifest(location)
                            .cloned()
                            .unwrap_or_else(|| Manifest::implicit(location.stem()));
                        next.insert(package, manifest);
                    }
                    None => {
                        changed = true;
                        unstable = Some(conflict::unsatisfiable(location, requirements));
                        let package = self.checkouts.ensure(location, &revision)?;
                        let manifest = load_manifest(&package)?;
                        next.insert(package, manifest);
                    }
                }
            }

            resolution = next;
            if !changed {
                info!(packages = resolution.len(), rounds = round, "resolution complete");
                return Ok(resolution);
            }
            debug!(round, packages = resolution.len(), "resolution round changed the package set");
        }

        Err(unstable.unwrap_or_else(|| PackageError::UnsatisfiableConstraints {
            location: root.name.clone(),
            constraints: vec![format!("no stable resolution after {} rounds", MAX_ROUNDS)],
        }))
    }

    /// Resolve one group, memoized on its constraint set
    fn pick(
        &self,
        versions: &VersionResolver<'_>,
        memo: &mut HashMap<(String, Vec<String>), ResolvedRevision>,
        identity: &str,
        location: &SourceLocation,
        requirements: &[Requirement],
    ) -> Result<ResolvedRevision> {
        let mut constraints: Vec<String> =
            requirements.iter().map(|r| r.constraint.to_string()).collect();
        constraints.sort();
        constraints.dedup();
        let key = (identity.to_string(), constraints);

        if let Some(revision) = memo.get(&key) {
            return Ok(revision.clone());
        }
        let locked = self
            .lockfile
            .and_then(|l| l.find(location))
            .map(LockedPackage::to_revision);
        let revision = versions.resolve(location, requirements, locked.as_ref())?;
        memo.insert(key, revision.clone());
        Ok(revision)
    }
}

/// Failures that another round with fresher manifests could clear
fn is_constraint_error(err: &PackageError) -> bool {
    matches!(
        err,
        PackageError::UnsatisfiableConstraints { .. }
            | PackageError::ConflictingPins { .. }
            | PackageError::RevisionNotFound { .. }
    )
}

type Groups = BTreeMap<String, (SourceLocation, Vec<Requirement>)>;

fn collect_requirements(root: &Manifest, resolution: &Resolution) -> Groups {
    let mut groups: Groups = BTreeMap::new();
    let mut add = |reference: &PackageReference, required_by: &str| {
        groups
            .entry(reference.location.identity().to_string())
            .or_insert_with(|| (reference.location.clone(), Vec::new()))
            .1
            .push(Requirement::from_reference(reference, required_by));
    };

    for reference in &root.packages {
        add(reference, &root.name);
    }
    for (_, manifest) in resolution.iter() {
        for reference in &manifest.packages {
            add(reference, &manifest.name);
        }
    }
    groups
}

fn load_manifest(package: &ResolvedPackage) -> Result<Manifest> {
    match Manifest::from_dir(&package.checkout_path)? {
        Some(manifest) => Ok(manifest),
        None => {
            debug!(location = %package.location, "no manifest in checkout, using implicit library");
            Ok(Manifest::implicit(package.location.stem()))
        }
    }
}
