//! Project manifest parsing and types (kiln.toml)

use crate::constraint::{VersionConstraint, VersionRange};
use crate::source::SourceLocation;
use crate::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of a project manifest
pub const MANIFEST_FILE: &str = "kiln.toml";

/// Platforms a target can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Macos,
    Tvos,
    Watchos,
    Linux,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Macos => "macos",
            Self::Tvos => "tvos",
            Self::Watchos => "watchos",
            Self::Linux => "linux",
            Self::Android => "android",
        }
    }

    /// Guess the platform from a target name such as `Demo-tvOS`
    pub fn infer_from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("tvos") {
            Self::Tvos
        } else if lower.contains("watchos") {
            Self::Watchos
        } else if lower.contains("macos") || lower.contains("osx") {
            Self::Macos
        } else if lower.contains("linux") {
            Self::Linux
        } else if lower.contains("android") {
            Self::Android
        } else {
            Self::Ios
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Application target
    #[default]
    App,
    /// Test bundle
    Test,
    /// Library other packages can depend on
    Library,
}

impl TargetKind {
    /// Apps and tests are built for a concrete platform
    pub fn requires_platform(&self) -> bool {
        matches!(self, Self::App | Self::Test)
    }
}

/// A build target declared in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub platform: Option<Platform>,
    pub kind: TargetKind,
    /// Directory of the target, relative to the manifest
    pub path: PathBuf,
    /// Sibling target names or library names, in declaration order
    pub dependencies: Vec<String>,
}

/// A library a package exposes to its dependants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    /// Targets that make up the library
    #[serde(default)]
    pub targets: Vec<String>,
}

/// An external package dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub location: SourceLocation,
    pub constraint: VersionConstraint,
    /// Library names the package is expected to expose
    pub libraries: Vec<String>,
}

impl PackageReference {
    pub fn new(location: SourceLocation, constraint: VersionConstraint) -> Self {
        Self {
            location,
            constraint,
            libraries: Vec::new(),
        }
    }

    /// Declared library names, or the repository stem when none are declared
    pub fn library_names(&self) -> Vec<String> {
        if self.libraries.is_empty() {
            vec![self.location.stem().to_string()]
        } else {
            self.libraries.clone()
        }
    }
}

/// Parsed project manifest (kiln.toml)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub targets: Vec<Target>,
    pub packages: Vec<PackageReference>,
    /// Explicitly declared libraries
    pub libraries: Vec<Library>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    project: Option<RawProject>,
    #[serde(default)]
    packages: Vec<RawPackage>,
    #[serde(default)]
    libraries: Vec<Library>,
    #[serde(default)]
    targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProject {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    url: Option<String>,
    version: Option<String>,
    tag: Option<String>,
    branch: Option<String>,
    rev: Option<String>,
    #[serde(default)]
    libraries: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    name: Option<String>,
    platform: Option<Platform>,
    #[serde(default)]
    kind: TargetKind,
    path: Option<PathBuf>,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn malformed(message: impl Into<String>) -> PackageError {
    PackageError::MalformedManifest(message.into())
}

/// Whether `value` is usable as a single file or directory name
///
/// Names and commit pins end up in checkout and cache paths.
pub fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && !value.contains("..")
        && !value.contains(|c: char| matches!(c, '/' | '\\' | ':' | '\0'))
}

fn check_segment(what: &str, value: &str) -> Result<()> {
    if is_path_segment(value) {
        Ok(())
    } else {
        Err(malformed(format!("{} '{}' is not a valid name", what, value)))
    }
}

impl Manifest {
    /// Parse and validate manifest text
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawManifest = toml::from_str(content)?;

        let name = raw
            .project
            .and_then(|p| p.name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| malformed("missing required field 'project.name'"))?;

        let packages = raw
            .packages
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| parse_package(idx, raw))
            .collect::<Result<Vec<_>>>()?;

        let targets = raw
            .targets
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| {
                let name = raw
                    .name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| malformed(format!("target #{} is missing 'name'", idx + 1)))?;
                let path = raw.path.unwrap_or_else(|| PathBuf::from(&name));
                Ok(Target {
                    name,
                    platform: raw.platform,
                    kind: raw.kind,
                    path,
                    dependencies: raw.dependencies,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let manifest = Self {
            name,
            targets,
            packages,
            libraries: raw.libraries,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load manifest from file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            PackageError::MalformedManifest(msg) => {
                malformed(format!("{}: {}", path.display(), msg))
            }
            PackageError::ParseError(err) => malformed(format!("{}: {}", path.display(), err)),
            other => other,
        })
    }

    /// Load `kiln.toml` from a directory, if present
    pub fn from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Self::from_file(&path).map(Some)
    }

    /// Manifest for a package that ships without one: a single library
    /// named after the package
    pub fn implicit(name: &str) -> Self {
        Self {
            name: name.to_string(),
            targets: vec![Target {
                name: name.to_string(),
                platform: None,
                kind: TargetKind::Library,
                path: PathBuf::from("."),
                dependencies: Vec::new(),
            }],
            packages: Vec::new(),
            libraries: Vec::new(),
        }
    }

    /// Validate structural invariants
    pub fn validate(&self) -> Result<()> {
        check_segment("project name", &self.name)?;

        let mut target_names = HashSet::new();
        for target in &self.targets {
            check_segment("target name", &target.name)?;
            if !target_names.insert(target.name.as_str()) {
                return Err(malformed(format!(
                    "duplicate target name '{}' in project '{}'",
                    target.name, self.name
                )));
            }
            if target.kind.requires_platform() && target.platform.is_none() {
                return Err(malformed(format!(
                    "target '{}' is missing 'platform'",
                    target.name
                )));
            }
        }

        let mut library_names = HashSet::new();
        for library in &self.libraries {
            check_segment("library name", &library.name)?;
            if !library_names.insert(library.name.as_str()) {
                return Err(malformed(format!(
                    "duplicate library name '{}' in project '{}'",
                    library.name, self.name
                )));
            }
            for target in &library.targets {
                if !target_names.contains(target.as_str()) {
                    return Err(malformed(format!(
                        "library '{}' refers to unknown target '{}'",
                        library.name, target
                    )));
                }
            }
        }

        let package_libraries: HashSet<String> = self
            .packages
            .iter()
            .flat_map(|p| p.library_names())
            .collect();

        for target in &self.targets {
            for dep in &target.dependencies {
                if !target_names.contains(dep.as_str()) && !package_libraries.contains(dep) {
                    return Err(malformed(format!(
                        "dependency '{}' of target '{}' matches neither a target nor a declared package",
                        dep, target.name
                    )));
                }
            }
        }

        self.check_target_cycles()
    }

    /// Reject targets that depend on each other in a loop
    fn check_target_cycles(&self) -> Result<()> {
        let index: HashMap<&str, &Target> =
            self.targets.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut done: HashSet<&str> = HashSet::new();

        for target in &self.targets {
            let mut path: Vec<&str> = Vec::new();
            if let Some(cycle) = find_target_cycle(target.name.as_str(), &index, &mut done, &mut path)
            {
                return Err(PackageError::DependencyCycle { cycle });
            }
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Targets built into the host project (apps and tests)
    pub fn app_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.kind.requires_platform())
    }

    /// Libraries this manifest exposes to dependants
    ///
    /// Explicit `[[libraries]]` win; otherwise every library-kind target is a
    /// library; otherwise the whole project is one library named after it.
    pub fn exposed_libraries(&self) -> Vec<Library> {
        if !self.libraries.is_empty() {
            return self.libraries.clone();
        }

        let library_targets: Vec<Library> = self
            .targets
            .iter()
            .filter(|t| t.kind == TargetKind::Library)
            .map(|t| Library {
                name: t.name.clone(),
                targets: vec![t.name.clone()],
            })
            .collect();
        if !library_targets.is_empty() {
            return library_targets;
        }

        vec![Library {
            name: self.name.clone(),
            targets: self.targets.iter().map(|t| t.name.clone()).collect(),
        }]
    }

    /// External library names a set of targets needs, following sibling
    /// target edges; sorted and deduplicated
    pub fn external_dependencies<'a>(&self, targets: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut external = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = targets.into_iter().collect();

        while let Some(name) = stack.pop() {
            if !visited.insert(name.to_string()) {
                continue;
            }
            let Some(target) = self.target(name) else {
                continue;
            };
            for dep in &target.dependencies {
                if self.target(dep).is_some() {
                    stack.push(dep.as_str());
                } else {
                    external.insert(dep.clone());
                }
            }
        }

        external.into_iter().collect()
    }

    /// Library names a library depends on
    ///
    /// Sibling targets that belong to another exposed library become an edge
    /// to that library instead of being folded into this one.
    pub fn library_dependencies(&self, library: &Library) -> Vec<String> {
        let exposed = self.exposed_libraries();
        let mut owner: HashMap<&str, &str> = HashMap::new();
        for lib in &exposed {
            for target in &lib.targets {
                owner.entry(target.as_str()).or_insert(lib.name.as_str());
            }
        }

        let own: HashSet<&str> = library.targets.iter().map(String::as_str).collect();
        let mut deps = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = library.targets.iter().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if !visited.insert(name) {
                continue;
            }
            let Some(target) = self.target(name) else {
                continue;
            };
            for dep in &target.dependencies {
                let dep = dep.as_str();
                if self.target(dep).is_none() {
                    deps.insert(dep.to_string());
                    continue;
                }
                match owner.get(dep) {
                    Some(lib) if !own.contains(dep) && *lib != library.name => {
                        deps.insert(lib.to_string());
                    }
                    _ => stack.push(dep),
                }
            }
        }

        deps.remove(&library.name);
        deps.into_iter().collect()
    }
}

fn parse_package(idx: usize, raw: RawPackage) -> Result<PackageReference> {
    let url = raw
        .url
        .ok_or_else(|| malformed(format!("package #{} is missing 'url'", idx + 1)))?;
    let location = SourceLocation::parse(&url).map_err(malformed)?;

    let mut constraints = Vec::new();
    if let Some(version) = raw.version {
        let range = VersionRange::parse(&version).map_err(|e| {
            malformed(format!("invalid version range '{}' for '{}': {}", version, url, e))
        })?;
        constraints.push(VersionConstraint::Range(range));
    }
    if let Some(tag) = raw.tag {
        constraints.push(VersionConstraint::Tag(tag));
    }
    if let Some(branch) = raw.branch {
        constraints.push(VersionConstraint::Branch(branch));
    }
    if let Some(rev) = raw.rev {
        if !rev.trim().is_empty() && !is_path_segment(&rev) {
            return Err(malformed(format!("package '{}' has an invalid rev '{}'", url, rev)));
        }
        constraints.push(VersionConstraint::Commit(rev));
    }

    if constraints.len() != 1 {
        return Err(malformed(format!(
            "package '{}' must specify exactly one of 'version', 'tag', 'branch' or 'rev'",
            url
        )));
    }

    let constraint = constraints.remove(0);
    if let VersionConstraint::Tag(s) | VersionConstraint::Branch(s) | VersionConstraint::Commit(s) =
        &constraint
    {
        if s.trim().is_empty() {
            return Err(malformed(format!("package '{}' has an empty revision", url)));
        }
    }

    Ok(PackageReference {
        location,
        constraint,
        libraries: raw.libraries,
    })
}

fn find_target_cycle<'a>(
    name: &'a str,
    index: &HashMap<&'a str, &'a Target>,
    done: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    if let Some(start) = path.iter().position(|n| *n == name) {
        let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
        cycle.push(name.to_string());
        return Some(cycle);
    }
    if done.contains(name) {
        return None;
    }

    path.push(name);
    if let Some(target) = index.get(name) {
        for dep in &target.dependencies {
            if let Some((dep_name, _)) = index.get_key_value(dep.as_str()) {
                if let Some(cycle) = find_target_cycle(dep_name, index, done, path) {
                    return Some(cycle);
                }
            }
        }
    }
    path.pop();
    done.insert(name);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DEMO: &str = r#"
[project]
name = "Demo"

[[packages]]
url = "https://github.com/AccioSupport/Alamofire.git"
version = "^4.8.1"

[[packages]]
url = "https://github.com/AccioSupport/lottie-ios.git"
branch = "master"
libraries = ["Lottie"]

[[targets]]
name = "Demo-iOS"
platform = "ios"
dependencies = ["Alamofire", "Lottie"]

[[targets]]
name = "Demo-iOSTests"
platform = "ios"
kind = "test"
dependencies = ["Demo-iOS"]
"#;

    #[test]
    fn test_parse_demo_manifest() {
        let manifest = Manifest::parse(DEMO).unwrap();
        assert_eq!(manifest.name, "Demo");
        assert_eq!(manifest.packages.len(), 2);
        assert_eq!(manifest.targets.len(), 2);
        assert_eq!(manifest.targets[0].path, PathBuf::from("Demo-iOS"));
        assert_eq!(manifest.targets[1].kind, TargetKind::Test);
        assert!(matches!(
            manifest.packages[1].constraint,
            VersionConstraint::Branch(ref b) if b == "master"
        ));
    }

    #[test]
    fn test_missing_project_name() {
        let err = Manifest::parse("[project]\n").unwrap_err();
        assert!(matches!(err, PackageError::MalformedManifest(msg) if msg.contains("project.name")));
    }

    #[test]
    fn test_duplicate_target_name() {
        let toml = r#"
[project]
name = "Dup"

[[targets]]
name = "App"
platform = "ios"

[[targets]]
name = "App"
platform = "macos"
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, PackageError::MalformedManifest(msg) if msg.contains("duplicate target")));
    }

    #[test]
    fn test_unknown_dependency_name() {
        let toml = r#"
[project]
name = "App"

[[targets]]
name = "App"
platform = "ios"
dependencies = ["Nowhere"]
"#;
        let err = Manifest::parse(toml).unwrap_err();
        assert!(matches!(err, PackageError::MalformedManifest(msg) if msg.contains("Nowhere")));
    }

    #[test]
    fn test_package_needs_exactly_one_constraint() {
        let toml = r#"
[project]
name = "App"

[[packages]]
url = "https://example.com/Net.git"
tag = "1.0.0"
branch = "main"
"#;
        assert!(matches!(
            Manifest::parse(toml),
            Err(PackageError::MalformedManifest(_))
        ));

        let none = r#"
[project]
name = "App"

[[packages]]
url = "https://example.com/Net.git"
"#;
        assert!(matches!(
            Manifest::parse(none),
            Err(PackageError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_app_target_requires_platform() {
        let toml = r#"
[project]
name = "App"

[[targets]]
name = "App"
"#;
        assert!(matches!(
            Manifest::parse(toml),
            Err(PackageError::MalformedManifest(msg)) if msg.contains("platform")
        ));
    }

    #[test]
    fn test_names_must_be_single_path_segments() {
        for name in ["Net", "Demo-iOS", "lottie_ios", "v1.2"] {
            assert!(is_path_segment(name), "{}", name);
        }
        for name in ["", "..", "../Net", "a/b", "a\\b", "/abs", "C:"] {
            assert!(!is_path_segment(name), "{}", name);
        }

        let target = "[project]\nname = \"App\"\n\n[[targets]]\nname = \"../App\"\nplatform = \"ios\"\n";
        assert!(matches!(
            Manifest::parse(target),
            Err(PackageError::MalformedManifest(msg)) if msg.contains("../App")
        ));

        let rev = r#"
[project]
name = "App"

[[packages]]
url = "https://example.com/Net.git"
rev = "../../etc"
"#;
        assert!(matches!(
            Manifest::parse(rev),
            Err(PackageError::MalformedManifest(msg)) if msg.contains("invalid rev")
        ));
    }

    #[test]
    fn test_sibling_target_cycle() {
        let toml = r#"
[project]
name = "Loop"

[[targets]]
name = "A"
kind = "library"
dependencies = ["B"]

[[targets]]
name = "B"
kind = "library"
dependencies = ["A"]
"#;
        match Manifest::parse(toml) {
            Err(PackageError::DependencyCycle { cycle }) => {
                assert_eq!(cycle, vec!["A", "B", "A"]);
            }
            other => panic!("expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_exposed_libraries_defaults() {
        let implicit = Manifest::implicit("Net");
        let libs = implicit.exposed_libraries();
        assert_eq!(libs.len(), 1);
        assert_eq!(libs[0].name, "Net");

        let toml = r#"
[project]
name = "Kit"

[[targets]]
name = "Core"
kind = "library"

[[targets]]
name = "UI"
kind = "library"
dependencies = ["Core"]
"#;
        let manifest = Manifest::parse(toml).unwrap();
        let libraries = manifest.exposed_libraries();
        let names: Vec<&str> = libraries.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Core", "UI"]);
        assert_eq!(manifest.library_dependencies(&libraries[1]), vec!["Core".to_string()]);
        assert!(manifest.library_dependencies(&libraries[0]).is_empty());
    }

    #[test]
    fn test_library_dependencies_follow_sibling_targets() {
        let toml = r#"
[project]
name = "Net"

[[packages]]
url = "https://example.com/Logging.git"
tag = "1.0.0"

[[packages]]
url = "https://example.com/Crypto.git"
tag = "2.0.0"

[[libraries]]
name = "Net"
targets = ["Net"]

[[targets]]
name = "Net"
kind = "library"
dependencies = ["NetCore", "Logging"]

[[targets]]
name = "NetCore"
kind = "library"
dependencies = ["Crypto"]
"#;
        let manifest = Manifest::parse(toml).unwrap();
        let library = &manifest.exposed_libraries()[0];
        assert_eq!(
            manifest.library_dependencies(library),
            vec!["Crypto".to_string(), "Logging".to_string()]
        );
    }
}
