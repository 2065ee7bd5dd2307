#![allow(dead_code)]

use kiln_build::{BuildError, BuildRequest, BuildResult, BuildTool};
use kiln_package::{
    DependencyGraph, GraphBuilder, Manifest, Platform, ResolvedPackage, ResolvedRevision,
    Resolution, RevisionSpec, SourceLocation,
};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub fn url(name: &str) -> String {
    format!("https://github.com/example/{}.git", name)
}

/// Manifest of a package with one library target named after the package
fn library_manifest(name: &str, deps: &[&str]) -> String {
    let mut out = format!("[project]\nname = \"{}\"\n", name);
    for package in deps {
        out.push_str(&format!(
            "\n[[packages]]\nurl = \"{}\"\ntag = \"1.0.0\"\n",
            url(package)
        ));
    }
    let deps = deps
        .iter()
        .map(|d| format!("\"{}\"", d))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!(
        "\n[[targets]]\nname = \"{}\"\nkind = \"library\"\ndependencies = [{}]\n",
        name, deps
    ));
    out
}

/// Resolved packages with real checkout directories and a root manifest
pub struct Fixture {
    pub dir: TempDir,
    pub root: Manifest,
    pub resolution: Resolution,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            root: Manifest::implicit("Empty"),
            resolution: Resolution::new(),
        }
    }

    /// Root project `App` with one target per `(name, platform, deps)`
    pub fn root(mut self, targets: &[(&str, &str, &[&str])]) -> Self {
        let mut packages: BTreeSet<&str> = BTreeSet::new();
        let mut text = String::from("[project]\nname = \"App\"\n");
        for (_, _, deps) in targets {
            packages.extend(deps.iter().copied());
        }
        for package in &packages {
            text.push_str(&format!("\n[[packages]]\nurl = \"{}\"\ntag = \"1.0.0\"\n", url(package)));
        }
        for (name, platform, deps) in targets {
            let deps = deps
                .iter()
                .map(|d| format!("\"{}\"", d))
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!(
                "\n[[targets]]\nname = \"{}\"\nplatform = \"{}\"\ndependencies = [{}]\n",
                name, platform, deps
            ));
        }
        self.root = Manifest::parse(&text).unwrap();
        self
    }

    /// A library package `name` at `commit` depending on `deps`
    pub fn library(self, name: &str, commit: &str, deps: &[&str]) -> Self {
        self.package(name, RevisionSpec::Tag("1.0.0".to_string()), commit, deps)
    }

    pub fn package(mut self, name: &str, spec: RevisionSpec, commit: &str, deps: &[&str]) -> Self {
        let location = SourceLocation::parse(&url(name)).unwrap();
        let checkout_path = self.dir.path().join("checkouts").join(name).join(commit);
        fs::create_dir_all(checkout_path.join("Sources")).unwrap();
        fs::write(
            checkout_path.join("Sources").join(format!("{}.swift", name)),
            format!("// {} at {}\n", name, commit),
        )
        .unwrap();

        let manifest = Manifest::parse(&library_manifest(name, deps)).unwrap();
        let package = ResolvedPackage {
            location,
            revision: ResolvedRevision::new(spec, commit),
            checkout_path,
        };
        self.resolution.insert(package, manifest);
        self
    }

    pub fn graph(&self) -> DependencyGraph {
        GraphBuilder::new(&self.root, &self.resolution).build().unwrap()
    }

    pub fn checkout(&self, name: &str, commit: &str) -> PathBuf {
        self.dir.path().join("checkouts").join(name).join(commit)
    }
}

/// Build tool that writes a small artifact and records every call
#[derive(Default)]
pub struct CountingTool {
    calls: AtomicUsize,
    log: Mutex<Vec<BuildRequest>>,
    failing: Mutex<BTreeSet<String>>,
    panicking: Mutex<BTreeSet<String>>,
    delay: Duration,
}

impl CountingTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(self, library: &str) -> Self {
        self.failing.lock().unwrap().insert(library.to_string());
        self
    }

    pub fn panic_on(self, library: &str) -> Self {
        self.panicking.lock().unwrap().insert(library.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Libraries in the order their builds started
    pub fn built(&self) -> Vec<(String, Platform)> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.library.clone(), r.platform))
            .collect()
    }

    pub fn requests_for(&self, library: &str) -> Vec<BuildRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.library == library)
            .cloned()
            .collect()
    }
}

impl BuildTool for CountingTool {
    fn build(&self, request: &BuildRequest) -> BuildResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(request.clone());
        if self.failing.lock().unwrap().contains(&request.library) {
            return Err(BuildError::build_failed(
                request.library.clone(),
                request.platform,
                "compiler exploded",
            ));
        }
        if self.panicking.lock().unwrap().contains(&request.library) {
            panic!("{} tool crashed", request.library);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        for dep in &request.dependencies {
            assert!(dep.exists(), "dependency artifact {} missing", dep.display());
        }

        let artifact = request.output_dir.join(format!("{}.framework", request.library));
        fs::create_dir_all(&artifact).unwrap();
        fs::write(
            artifact.join(&request.library),
            format!(
                "{} {} {} {}",
                request.library, request.platform, request.toolchain_version, request.configuration
            ),
        )
        .unwrap();
        Ok(artifact)
    }
}

/// Directory holding a single file artifact of `bytes` bytes
pub fn artifact(dir: &Path, name: &str, bytes: usize) -> PathBuf {
    let path = dir.join(name);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("lib.a"), vec![b'x'; bytes]).unwrap();
    path
}

pub fn counts(values: &[(String, Platform)]) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (name, _) in values {
        *map.entry(name.clone()).or_insert(0) += 1;
    }
    map
}
