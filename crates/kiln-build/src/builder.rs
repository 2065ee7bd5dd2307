//! Build orchestration
//!
//! Every library reachable from a root target is built once per platform that
//! needs it. Units whose dependencies are all available are handed to a rayon
//! pool; completions come back over a channel and release their dependants.

use crate::cache::{ArtifactCache, Lookup, StagingDir};
use crate::error::{BuildError, BuildResult};
use crate::signature::source_signature;
use crate::targets::{BuildUnit, CacheKey};
use crate::tool::{BuildRequest, BuildTool};
use kiln_config::EngineConfig;
use kiln_package::{DependencyGraph, Platform};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a unit ended up with (or without) an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Found in the local cache
    Cached,
    /// Copied from the shared cache
    SharedCache,
    /// Built by the build tool
    Built,
    /// The build failed with this reason
    Failed(String),
    /// Not attempted
    Skipped(String),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Cached | Self::SharedCache | Self::Built)
    }
}

/// Result for one build unit
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub library: String,
    pub platform: Platform,
    pub outcome: UnitOutcome,
    /// Artifact in the local cache, for successful units
    pub artifact: Option<PathBuf>,
    pub duration: Duration,
}

/// Build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub total_units: usize,
    pub cached: usize,
    pub shared: usize,
    pub built: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of an orchestrator run
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Units in build order
    pub units: Vec<UnitReport>,
    pub total_time: Duration,
}

impl BuildReport {
    pub fn stats(&self) -> BuildStats {
        let mut stats = BuildStats {
            total_units: self.units.len(),
            ..BuildStats::default()
        };
        for unit in &self.units {
            match unit.outcome {
                UnitOutcome::Cached => stats.cached += 1,
                UnitOutcome::SharedCache => stats.shared += 1,
                UnitOutcome::Built => stats.built += 1,
                UnitOutcome::Failed(_) => stats.failed += 1,
                UnitOutcome::Skipped(_) => stats.skipped += 1,
            }
        }
        stats
    }

    pub fn is_success(&self) -> bool {
        self.units.iter().all(|u| u.outcome.is_success())
    }

    pub fn unit(&self, library: &str, platform: Platform) -> Option<&UnitReport> {
        self.units
            .iter()
            .find(|u| u.library == library && u.platform == platform)
    }

    pub fn artifact(&self, library: &str, platform: Platform) -> Option<&Path> {
        self.unit(library, platform)
            .and_then(|u| u.artifact.as_deref())
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.units
            .iter()
            .filter(|u| matches!(u.outcome, UnitOutcome::Failed(_)))
    }

    /// The report, or `BuildFailed` for the first failed unit in build order
    pub fn into_result(self) -> BuildResult<Self> {
        if let Some(failed) = self.failures().next() {
            let reason = match &failed.outcome {
                UnitOutcome::Failed(reason) => reason.clone(),
                _ => String::new(),
            };
            return Err(BuildError::build_failed(
                failed.library.clone(),
                failed.platform,
                reason,
            ));
        }
        Ok(self)
    }
}

/// Drives cache lookups and builds over a dependency graph
pub struct Orchestrator<'a> {
    config: &'a EngineConfig,
    cache: &'a ArtifactCache,
    shared: Option<&'a ArtifactCache>,
    tool: &'a dyn BuildTool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a EngineConfig, cache: &'a ArtifactCache, tool: &'a dyn BuildTool) -> Self {
        Self {
            config,
            cache,
            shared: None,
            tool,
        }
    }

    /// Consult `shared` after a local miss and publish fresh builds to it
    pub fn with_shared_cache(mut self, shared: &'a ArtifactCache) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Build units for every library each root target needs
    ///
    /// Units follow the graph's build order, then platform. Dependency indices
    /// always point at earlier units.
    pub fn plan(graph: &DependencyGraph) -> Vec<BuildUnit> {
        let mut platforms: HashMap<String, BTreeSet<Platform>> = HashMap::new();
        for root in graph.roots() {
            for library in graph.closure(root.dependencies.iter().map(String::as_str)) {
                platforms.entry(library).or_default().insert(root.platform);
            }
        }

        let mut units = Vec::new();
        let mut index: HashMap<(String, Platform), usize> = HashMap::new();
        for node in graph.nodes() {
            let Some(node_platforms) = platforms.get(&node.name) else {
                continue;
            };
            for &platform in node_platforms {
                let dependencies = node
                    .dependencies
                    .iter()
                    .filter_map(|dep| index.get(&(dep.clone(), platform)).copied())
                    .collect();
                index.insert((node.name.clone(), platform), units.len());
                units.push(BuildUnit {
                    node: node.clone(),
                    platform,
                    dependencies,
                });
            }
        }
        units
    }

    /// Build the graph and report per-unit outcomes
    ///
    /// Build failures are recorded in the report rather than returned; only
    /// problems setting up the run are errors. Artifacts the run touches stay
    /// pinned in the local cache until the next run starts.
    pub fn run(&self, graph: &DependencyGraph) -> BuildResult<BuildReport> {
        let start = Instant::now();
        self.cache.release_pins();
        let units = Self::plan(graph);
        if units.is_empty() {
            return Ok(BuildReport::default());
        }
        let toolchain = self
            .config
            .toolchain_version
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(BuildError::ToolchainUnknown)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs.max(1))
            .thread_name(|i| format!("kiln-build-{}", i))
            .build()
            .map_err(|e| BuildError::WorkerPool(e.to_string()))?;

        let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
        for (i, unit) in units.iter().enumerate() {
            for &dep in &unit.dependencies {
                dependants[dep].push(i);
            }
        }
        let mut waiting: Vec<usize> = units.iter().map(|u| u.dependencies.len()).collect();
        let mut ready: BTreeSet<usize> = (0..units.len()).filter(|&i| waiting[i] == 0).collect();
        let mut results: Vec<Option<UnitReport>> = vec![None; units.len()];
        let mut halted = false;

        let (tx, rx) = mpsc::channel::<(usize, Duration, BuildResult<(UnitOutcome, PathBuf)>)>();

        pool.in_place_scope(|scope| {
            let mut running = 0usize;
            loop {
                while !halted {
                    let Some(i) = ready.pop_first() else {
                        break;
                    };
                    let unit = &units[i];
                    let inputs: Vec<PathBuf> = unit
                        .dependencies
                        .iter()
                        .filter_map(|&d| results[d].as_ref().and_then(|r| r.artifact.clone()))
                        .collect();
                    let tx = tx.clone();
                    debug!(%unit, "scheduling");
                    scope.spawn(move |_| {
                        let started = Instant::now();
                        let result = panic::catch_unwind(AssertUnwindSafe(|| self.build_unit(unit, toolchain, inputs)))
                            .unwrap_or_else(|payload| {
                                Err(BuildError::build_failed(
                                    unit.library(),
                                    unit.platform,
                                    format!("build panicked: {}", panic_message(payload.as_ref())),
                                ))
                            });
                        let _ = tx.send((i, started.elapsed(), result));
                    });
                    running += 1;
                }

                if running == 0 {
                    break;
                }
                let Ok((i, duration, result)) = rx.recv() else {
                    break;
                };
                running -= 1;

                let unit = &units[i];
                match result {
                    Ok((outcome, artifact)) => {
                        for &dependant in &dependants[i] {
                            waiting[dependant] -= 1;
                            if waiting[dependant] == 0 {
                                ready.insert(dependant);
                            }
                        }
                        results[i] = Some(report(unit, outcome, Some(artifact), duration));
                    }
                    Err(err) => {
                        let reason = failure_reason(err);
                        warn!(%unit, %reason, "build failed");
                        results[i] = Some(report(unit, UnitOutcome::Failed(reason), None, duration));
                        skip_dependants(&units, &dependants, i, &mut results);
                        if !self.config.keep_going {
                            halted = true;
                        }
                    }
                }
            }
        });

        let units = units
            .iter()
            .zip(results)
            .map(|(unit, result)| {
                result.unwrap_or_else(|| {
                    report(
                        unit,
                        UnitOutcome::Skipped("build stopped after an earlier failure".to_string()),
                        None,
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        let report = BuildReport {
            units,
            total_time: start.elapsed(),
        };
        let stats = report.stats();
        info!(
            built = stats.built,
            cached = stats.cached,
            shared = stats.shared,
            failed = stats.failed,
            skipped = stats.skipped,
            elapsed_ms = report.total_time.as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }

    /// [`Orchestrator::run`], failing with `BuildFailed` if any unit failed
    pub fn build(&self, graph: &DependencyGraph) -> BuildResult<BuildReport> {
        self.run(graph)?.into_result()
    }

    fn build_unit(
        &self,
        unit: &BuildUnit,
        toolchain: &str,
        inputs: Vec<PathBuf>,
    ) -> BuildResult<(UnitOutcome, PathBuf)> {
        let key = unit.cache_key(toolchain, self.config.configuration);
        let checkout = &unit.node.package.checkout_path;
        let signature = source_signature(checkout)?;
        let mutable = unit.node.package.revision.is_mutable();

        let mut origin = UnitOutcome::Built;
        let mut scratch = None;
        let (entry, lookup) = self.cache.get_or_build(&key, &signature, mutable, || {
            if let Some(artifact) = self.shared_lookup(&key, &signature) {
                origin = UnitOutcome::SharedCache;
                return Ok(artifact);
            }

            let output = self.cache.staging_dir(&format!("build-{}", unit.library()));
            fs::create_dir_all(&output).map_err(|e| BuildError::io(&output, e))?;
            scratch = Some(StagingDir::new(output.clone()));

            let request = BuildRequest {
                checkout_path: checkout.clone(),
                library: unit.library().to_string(),
                targets: unit.node.targets.clone(),
                platform: unit.platform,
                toolchain_version: toolchain.to_string(),
                configuration: self.config.configuration,
                output_dir: output,
                dependencies: inputs,
            };
            info!(%unit, revision = %unit.node.package.revision, "building");
            let artifact = self.tool.build(&request)?;
            self.shared_store(&key, &artifact, &signature, mutable);
            Ok(artifact)
        })?;
        drop(scratch);

        let outcome = match lookup {
            Lookup::Hit => {
                debug!(%unit, "cached");
                UnitOutcome::Cached
            }
            Lookup::Stored => origin,
        };
        Ok((outcome, entry.artifact_path))
    }

    fn shared_lookup(&self, key: &CacheKey, signature: &str) -> Option<PathBuf> {
        let shared = self.shared?;
        match shared.lookup(key, signature) {
            Ok(entry) => entry.map(|e| e.artifact_path),
            Err(err) => {
                warn!(%key, error = %err, "shared cache lookup failed");
                None
            }
        }
    }

    fn shared_store(&self, key: &CacheKey, artifact: &Path, signature: &str, mutable: bool) {
        if let Some(shared) = self.shared {
            if let Err(err) = shared.store(key, artifact, signature, mutable) {
                warn!(%key, error = %err, "could not publish artifact to shared cache");
            }
        }
    }
}

fn report(unit: &BuildUnit, outcome: UnitOutcome, artifact: Option<PathBuf>, duration: Duration) -> UnitReport {
    UnitReport {
        library: unit.library().to_string(),
        platform: unit.platform,
        outcome,
        artifact,
        duration,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn failure_reason(err: BuildError) -> String {
    match err {
        BuildError::BuildFailed { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Mark every transitive dependant of `failed` as skipped
fn skip_dependants(
    units: &[BuildUnit],
    dependants: &[Vec<usize>],
    failed: usize,
    results: &mut [Option<UnitReport>],
) {
    let reason = format!("dependency {} failed", units[failed]);
    let mut queue: VecDeque<usize> = dependants[failed].iter().copied().collect();
    let mut seen = BTreeSet::new();
    while let Some(i) = queue.pop_front() {
        if !seen.insert(i) || results[i].is_some() {
            continue;
        }
        results[i] = Some(report(
            &units[i],
            UnitOutcome::Skipped(reason.clone()),
            None,
            Duration::ZERO,
        ));
        queue.extend(dependants[i].iter().copied());
    }
}
