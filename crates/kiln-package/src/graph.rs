//! Library dependency graph and build order
//!
//! Nodes are libraries exposed by resolved packages, reached from the root
//! project's targets. Edges come from each package's own manifest. The build
//! order is a topological sort with ties broken by library name.

use crate::checkout::ResolvedPackage;
use crate::manifest::{Library, Manifest, Platform};
use crate::resolver::Resolution;
use crate::{PackageError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// One library of a resolved package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryNode {
    pub name: String,
    pub package: ResolvedPackage,
    /// Targets of the package that make up the library
    pub targets: Vec<String>,
    /// Library names this library depends on, sorted
    pub dependencies: Vec<String>,
}

/// A target of the root project that consumes libraries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTarget {
    pub name: String,
    pub platform: Platform,
    /// Libraries the target needs directly, sorted
    pub dependencies: Vec<String>,
}

/// Acyclic library graph with a deterministic build order
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, LibraryNode>,
    order: Vec<String>,
    roots: Vec<RootTarget>,
}

impl DependencyGraph {
    pub fn node(&self, name: &str) -> Option<&LibraryNode> {
        self.nodes.get(name)
    }

    /// Libraries in build order; every node follows its dependencies
    pub fn build_order(&self) -> &[String] {
        &self.order
    }

    /// Nodes in build order
    pub fn nodes(&self) -> impl Iterator<Item = &LibraryNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn roots(&self) -> &[RootTarget] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names plus everything they depend on, in build order
    pub fn closure<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut needed = HashSet::new();
        let mut stack: Vec<&str> = names.into_iter().collect();
        while let Some(name) = stack.pop() {
            if !needed.insert(name.to_string()) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                stack.extend(node.dependencies.iter().map(String::as_str));
            }
        }

        self.order
            .iter()
            .filter(|name| needed.contains(*name))
            .cloned()
            .collect()
    }

    /// Libraries that depend on `name`, directly or transitively
    pub fn dependants(&self, name: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            for node in self.nodes.values() {
                if node.dependencies.contains(&current) && result.insert(node.name.clone()) {
                    queue.push_back(node.name.clone());
                }
            }
        }
        result
    }

    /// Groups of libraries that can be built in parallel
    ///
    /// Each group depends only on earlier groups; groups are sorted by name.
    pub fn parallel_groups(&self) -> Vec<Vec<String>> {
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();

        for name in &self.order {
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            let depth = node
                .dependencies
                .iter()
                .filter_map(|dep| level.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(name.as_str(), depth);
            if groups.len() <= depth {
                groups.resize_with(depth + 1, Vec::new);
            }
            groups[depth].push(name.clone());
        }

        for group in &mut groups {
            group.sort();
        }
        groups
    }
}

/// Builds a [`DependencyGraph`] from the root manifest and a resolution
pub struct GraphBuilder<'a> {
    root: &'a Manifest,
    resolution: &'a Resolution,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(root: &'a Manifest, resolution: &'a Resolution) -> Self {
        Self { root, resolution }
    }

    pub fn build(&self) -> Result<DependencyGraph> {
        let exposed = self.exposure_map();

        let roots: Vec<RootTarget> = self
            .root
            .targets
            .iter()
            .filter_map(|target| {
                let platform = target.platform?;
                Some(RootTarget {
                    name: target.name.clone(),
                    platform,
                    dependencies: self.root.external_dependencies([target.name.as_str()]),
                })
            })
            .collect();

        let mut nodes: BTreeMap<String, LibraryNode> = BTreeMap::new();
        let mut queue: VecDeque<(String, String, Option<&ResolvedPackage>)> = VecDeque::new();
        for root in &roots {
            for dep in &root.dependencies {
                queue.push_back((dep.clone(), root.name.clone(), None));
            }
        }

        while let Some((name, required_by, from)) = queue.pop_front() {
            let (package, manifest, library) = self.lookup(&exposed, &name, &required_by, from)?;
            if let Some(existing) = nodes.get(&name) {
                // One name must mean one library across the whole graph.
                if existing.package.location != package.location {
                    let mut packages = vec![
                        existing.package.location.to_string(),
                        package.location.to_string(),
                    ];
                    packages.sort();
                    return Err(PackageError::DuplicateLibraryName { name, packages });
                }
                continue;
            }

            let dependencies = manifest.library_dependencies(library);
            for dep in &dependencies {
                queue.push_back((dep.clone(), name.clone(), Some(package)));
            }

            debug!(library = %name, package = %package.location, ?dependencies, "graph node");
            nodes.insert(
                name.clone(),
                LibraryNode {
                    name: name.clone(),
                    package: package.clone(),
                    targets: library.targets.clone(),
                    dependencies,
                },
            );
        }

        let order = topological_order(&nodes)?;
        Ok(DependencyGraph {
            nodes,
            order,
            roots,
        })
    }

    /// Library name -> packages exposing it
    fn exposure_map(&self) -> BTreeMap<String, Vec<(&'a ResolvedPackage, &'a Manifest, Library)>> {
        let mut map: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for (package, manifest) in self.resolution.iter() {
            for library in manifest.exposed_libraries() {
                map.entry(library.name.clone())
                    .or_default()
                    .push((package, manifest, library));
            }
        }
        map
    }

    #[allow(clippy::type_complexity)]
    fn lookup<'m>(
        &self,
        exposed: &'m BTreeMap<String, Vec<(&'a ResolvedPackage, &'a Manifest, Library)>>,
        name: &str,
        required_by: &str,
        from: Option<&ResolvedPackage>,
    ) -> Result<(&'a ResolvedPackage, &'a Manifest, &'m Library)> {
        let candidates = exposed.get(name).map(Vec::as_slice).unwrap_or_default();

        // A library's dependency on a sibling library stays inside its package.
        if let Some(from) = from {
            if let Some((package, manifest, library)) = candidates
                .iter()
                .find(|(package, _, _)| package.location == from.location)
            {
                return Ok((*package, *manifest, library));
            }
        }

        match candidates {
            [] => Err(PackageError::MissingDependency {
                name: name.to_string(),
                required_by: required_by.to_string(),
            }),
            [(package, manifest, library)] => Ok((*package, *manifest, library)),
            many => {
                let mut packages: Vec<String> =
                    many.iter().map(|(p, _, _)| p.location.to_string()).collect();
                packages.sort();
                Err(PackageError::DuplicateLibraryName {
                    name: name.to_string(),
                    packages,
                })
            }
        }
    }
}

/// Kahn's algorithm; the ready set is ordered so ties go to the smaller name
fn topological_order(nodes: &BTreeMap<String, LibraryNode>) -> Result<Vec<String>> {
    let mut remaining: HashMap<&str, usize> = nodes
        .values()
        .map(|n| (n.name.as_str(), n.dependencies.len()))
        .collect();
    let mut dependants: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes.values() {
        for dep in &node.dependencies {
            dependants.entry(dep.as_str()).or_default().push(node.name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for dependant in dependants.get(name).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependant) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependant);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let cycle = find_cycle(nodes).unwrap_or_else(|| {
            let mut stuck: Vec<String> = nodes
                .keys()
                .filter(|name| !order.contains(name))
                .cloned()
                .collect();
            stuck.sort();
            stuck
        });
        return Err(PackageError::DependencyCycle { cycle });
    }

    Ok(order)
}

/// Depth-first search for a cycle, reported as `[A, B, A]`
fn find_cycle(nodes: &BTreeMap<String, LibraryNode>) -> Option<Vec<String>> {
    fn visit<'n>(
        name: &'n str,
        nodes: &'n BTreeMap<String, LibraryNode>,
        done: &mut HashSet<&'n str>,
        path: &mut Vec<&'n str>,
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
        if let Some(node) = nodes.get(name) {
            for dep in &node.dependencies {
                if let Some(cycle) = visit(dep.as_str(), nodes, done, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        done.insert(name);
        None
    }

    let mut done = HashSet::new();
    for name in nodes.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(name.as_str(), nodes, &mut done, &mut path) {
            return Some(cycle);
        }
    }
    None
}
