//! Subcommand implementations and the plumbing they share

pub mod cache;
pub mod init;
pub mod install;
pub mod update;

use crate::GlobalArgs;
use anyhow::{bail, Context, Result};
use kiln_build::{
    ensure_toolchain, integrate, ArtifactCache, BuildReport, CommandBuildTool, DependenciesDirIntegrator,
    Orchestrator,
};
use kiln_config::{ConfigLoader, EngineConfig};
use kiln_package::{
    CheckoutManager, GitCli, GraphBuilder, Lockfile, Manifest, Resolver, LOCKFILE, MANIFEST_FILE,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Per-project directory holding checkouts
pub const STATE_DIR: &str = ".kiln";

/// Engine configuration with command-line flags applied last
pub fn load_config(global: &GlobalArgs) -> Result<EngineConfig> {
    let mut config = ConfigLoader::new()
        .load()
        .context("Failed to load kiln configuration")?;

    if let Some(jobs) = global.jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        config.jobs = jobs;
    }
    if let Some(toolchain) = &global.toolchain {
        config.toolchain_version = Some(toolchain.clone());
    }
    if let Some(configuration) = global.configuration {
        config.configuration = configuration;
    }
    if global.keep_going {
        config.keep_going = true;
    }
    if let Some(command) = &global.build_command {
        config.build_command = Some(command.clone());
    }
    Ok(config)
}

pub fn project_dir(global: &GlobalArgs) -> Result<PathBuf> {
    match &global.project {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Failed to read the current directory"),
    }
}

/// Find kiln.toml in `start_dir` or any parent
pub fn find_manifest(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir
        .canonicalize()
        .unwrap_or_else(|_| start_dir.to_path_buf());

    loop {
        let manifest_path = current.join(MANIFEST_FILE);
        if manifest_path.exists() {
            return Ok(manifest_path);
        }

        if !current.pop() {
            break;
        }
    }

    bail!(
        "Could not find {} in {} or any parent directory",
        MANIFEST_FILE,
        start_dir.display()
    )
}

/// Resolve, check out, build and integrate the project's dependencies
///
/// `use_lockfile` distinguishes `install` from `update`.
pub fn sync(global: &GlobalArgs, use_lockfile: bool) -> Result<()> {
    let mut config = load_config(global)?;
    let manifest_path = find_manifest(&project_dir(global)?)?;
    let project = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let root = Manifest::from_file(&manifest_path)?;
    let lockfile_path = project.join(LOCKFILE);
    let lockfile = if use_lockfile {
        Lockfile::from_dir(&project).context("Failed to read kiln.lock")?
    } else {
        None
    };

    let checkouts = CheckoutManager::new(project.join(STATE_DIR).join("checkouts"), Arc::new(GitCli::new()));
    let mut resolver = Resolver::new(&checkouts);
    if let Some(lockfile) = &lockfile {
        resolver = resolver.with_lockfile(lockfile);
    }
    let resolution = resolver.resolve(&root)?;
    info!(packages = resolution.len(), "resolved dependencies");

    resolution
        .to_lockfile()
        .write_to_file(&lockfile_path)
        .with_context(|| format!("Failed to write {}", lockfile_path.display()))?;

    for (package, _) in resolution.iter() {
        println!("  {} {}", package.location, package.revision);
    }

    let graph = GraphBuilder::new(&root, &resolution).build()?;
    if graph.is_empty() {
        println!("No libraries to build.");
        return Ok(());
    }

    let Some(command) = config.build_command.clone() else {
        bail!(
            "No build command configured; set [build] command in ~/.kiln/config.toml, \
             KILN_BUILD_COMMAND or --build-command"
        );
    };
    let detect = config.toolchain_command.clone();
    let toolchain = ensure_toolchain(&mut config).with_context(|| {
        format!(
            "Failed to detect the toolchain with '{}'; set [build] toolchain, KILN_TOOLCHAIN or --toolchain",
            detect
        )
    })?;
    info!(%toolchain, "building with toolchain");
    let tool = CommandBuildTool::new(command);
    let cache = ArtifactCache::from_config(&config)?;
    let shared = ArtifactCache::shared_from_config(&config)?;

    let mut orchestrator = Orchestrator::new(&config, &cache, &tool);
    if let Some(shared) = &shared {
        orchestrator = orchestrator.with_shared_cache(shared);
    }
    let report = orchestrator.run(&graph)?;
    print_report(&report);
    let report = report.into_result()?;

    let mut sink = DependenciesDirIntegrator::new();
    let references = integrate(&report, &graph, &project, &mut sink)?;
    println!("Integrated {} artifact reference(s) into {}", references, project.display());
    Ok(())
}

fn print_report(report: &BuildReport) {
    for unit in &report.units {
        println!("  {:<24} {:<8} {:?}", unit.library, unit.platform.as_str(), unit.outcome);
    }
    let stats = report.stats();
    println!(
        "{} built, {} cached, {} from shared cache, {} failed, {} skipped in {:.2}s",
        stats.built,
        stats.cached,
        stats.shared,
        stats.failed,
        stats.skipped,
        report.total_time.as_secs_f64()
    );
}
