mod common;

use common::{CountingTool, Fixture};
use kiln_build::{ArtifactCache, BuildError, Orchestrator, UnitOutcome};
use kiln_config::EngineConfig;
use kiln_package::{Platform, RevisionSpec};
use pretty_assertions::assert_eq;
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// App -> Net -> {Log, Util}, Log -> Util
fn diamond() -> Fixture {
    Fixture::new()
        .root(&[("App", "ios", &["Net"])])
        .library("Net", "n1", &["Log", "Util"])
        .library("Log", "l1", &["Util"])
        .library("Util", "u1", &[])
}

fn config(cache_dir: &TempDir) -> EngineConfig {
    EngineConfig::new(cache_dir.path())
        .with_toolchain("T1")
        .with_jobs(4)
}

fn outcomes(report: &kiln_build::BuildReport) -> Vec<(&str, &UnitOutcome)> {
    report
        .units
        .iter()
        .map(|u| (u.library.as_str(), &u.outcome))
        .collect()
}

#[test]
fn test_builds_in_dependency_order_then_hits_cache() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();

    let report = Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();
    let order: Vec<String> = tool.built().into_iter().map(|(name, _)| name).collect();
    assert_eq!(order, vec!["Util", "Log", "Net"]);
    assert_eq!(report.stats().built, 3);

    let again = Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();
    assert_eq!(tool.calls(), 3);
    assert_eq!(
        outcomes(&again),
        vec![
            ("Util", &UnitOutcome::Cached),
            ("Log", &UnitOutcome::Cached),
            ("Net", &UnitOutcome::Cached),
        ]
    );
    assert_eq!(
        again.artifact("Net", Platform::Ios),
        report.artifact("Net", Platform::Ios)
    );
}

#[test]
fn test_dependency_artifacts_are_available_to_dependants() {
    let fixture = diamond();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();

    let report = Orchestrator::new(&config, &cache, &tool)
        .build(&fixture.graph())
        .unwrap();

    let net = tool.requests_for("Net");
    assert_eq!(net.len(), 1);
    assert_eq!(net[0].targets, vec!["Net".to_string()]);
    assert_eq!(net[0].toolchain_version, "T1");
    let mut deps = net[0].dependencies.clone();
    deps.sort();
    let mut expected = vec![
        report.artifact("Log", Platform::Ios).unwrap().to_path_buf(),
        report.artifact("Util", Platform::Ios).unwrap().to_path_buf(),
    ];
    expected.sort();
    assert_eq!(deps, expected);
}

#[test]
fn test_failure_skips_dependants() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new().fail("Log");
    let orchestrator = Orchestrator::new(&config, &cache, &tool);

    let report = orchestrator.run(&graph).unwrap();
    assert_eq!(report.units[0].outcome, UnitOutcome::Built);
    assert_eq!(
        report.units[1].outcome,
        UnitOutcome::Failed("compiler exploded".to_string())
    );
    assert!(matches!(report.units[2].outcome, UnitOutcome::Skipped(_)));
    assert!(tool.requests_for("Net").is_empty());
    assert!(cache.stats().unwrap().entries == 1);

    match orchestrator.build(&graph) {
        Err(BuildError::BuildFailed { library, platform, reason }) => {
            assert_eq!(library, "Log");
            assert_eq!(platform, Platform::Ios);
            assert_eq!(reason, "compiler exploded");
        }
        other => panic!("expected BuildFailed, got {:?}", other),
    }
}

/// App -> {A, B}, B -> C; A fails immediately while C is still building
fn split() -> Fixture {
    Fixture::new()
        .root(&[("App", "ios", &["A", "B"])])
        .library("A", "a1", &[])
        .library("B", "b1", &["C"])
        .library("C", "c1", &[])
}

#[test]
fn test_stop_scheduling_after_first_failure() {
    let fixture = split();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir).with_jobs(2);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::with_delay(Duration::from_millis(200)).fail("A");

    let report = Orchestrator::new(&config, &cache, &tool)
        .run(&fixture.graph())
        .unwrap();

    let stats = report.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.built, 1);
    assert_eq!(stats.skipped, 1);
    assert!(matches!(
        report.unit("B", Platform::Ios).unwrap().outcome,
        UnitOutcome::Skipped(_)
    ));
    assert!(tool.requests_for("B").is_empty());
}

#[test]
fn test_keep_going_builds_independent_subtrees() {
    let fixture = split();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir).with_jobs(2).with_keep_going(true);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::with_delay(Duration::from_millis(50)).fail("A");

    let report = Orchestrator::new(&config, &cache, &tool)
        .run(&fixture.graph())
        .unwrap();

    assert_eq!(report.unit("B", Platform::Ios).unwrap().outcome, UnitOutcome::Built);
    assert_eq!(report.unit("C", Platform::Ios).unwrap().outcome, UnitOutcome::Built);
    assert!(!report.is_success());
    assert!(report.into_result().is_err());
}

#[test]
fn test_each_platform_is_its_own_unit() {
    let fixture = Fixture::new()
        .root(&[("App", "ios", &["Util"]), ("TV", "tvos", &["Util"])])
        .library("Util", "u1", &[]);
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();

    let report = Orchestrator::new(&config, &cache, &tool)
        .build(&fixture.graph())
        .unwrap();

    assert_eq!(tool.calls(), 2);
    assert_eq!(
        tool.built().into_iter().map(|(_, p)| p).collect::<std::collections::BTreeSet<_>>(),
        [Platform::Ios, Platform::Tvos].into_iter().collect()
    );
    assert_ne!(
        report.artifact("Util", Platform::Ios),
        report.artifact("Util", Platform::Tvos)
    );
}

#[test]
fn test_shared_cache_serves_other_machines() {
    let fixture = diamond();
    let graph = fixture.graph();
    let shared_dir = TempDir::new().unwrap();
    let shared = ArtifactCache::open(shared_dir.path()).unwrap();
    let tool = CountingTool::new();

    let first_dir = TempDir::new().unwrap();
    let first_config = config(&first_dir);
    let first = ArtifactCache::from_config(&first_config).unwrap();
    Orchestrator::new(&first_config, &first, &tool)
        .with_shared_cache(&shared)
        .build(&graph)
        .unwrap();
    assert_eq!(tool.calls(), 3);
    assert_eq!(shared.stats().unwrap().entries, 3);

    let second_dir = TempDir::new().unwrap();
    let second_config = config(&second_dir);
    let second = ArtifactCache::from_config(&second_config).unwrap();
    let report = Orchestrator::new(&second_config, &second, &tool)
        .with_shared_cache(&shared)
        .build(&graph)
        .unwrap();
    assert_eq!(tool.calls(), 3);
    assert_eq!(report.stats().shared, 3);
    assert!(report
        .artifact("Net", Platform::Ios)
        .unwrap()
        .starts_with(second_dir.path()));

    let local = Orchestrator::new(&second_config, &second, &tool)
        .build(&graph)
        .unwrap();
    assert_eq!(local.stats().cached, 3);
}

#[test]
fn test_changed_checkout_rebuilds() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();
    Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();

    fs::write(fixture.checkout("Util", "u1").join("Sources/Extra.swift"), "// new\n").unwrap();
    let report = Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();

    assert_eq!(tool.calls(), 4);
    assert_eq!(report.unit("Util", Platform::Ios).unwrap().outcome, UnitOutcome::Built);
    assert_eq!(report.unit("Net", Platform::Ios).unwrap().outcome, UnitOutcome::Cached);
}

#[test]
fn test_branch_artifacts_expire() {
    let fixture = Fixture::new()
        .root(&[("App", "ios", &["Edge"])])
        .package("Edge", RevisionSpec::Branch("main".to_string()), "e1", &[]);
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let mut config = config(&cache_dir);
    config.branch_max_age = Duration::ZERO;
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();

    Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();
    thread::sleep(Duration::from_millis(10));
    let report = Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();

    assert_eq!(tool.calls(), 2);
    assert_eq!(report.units[0].outcome, UnitOutcome::Built);
}

#[test]
fn test_other_configuration_misses() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let release = config(&cache_dir);
    let debug = release
        .clone()
        .with_configuration(kiln_config::BuildConfiguration::Debug);
    let cache = ArtifactCache::from_config(&release).unwrap();
    let tool = CountingTool::new();

    Orchestrator::new(&release, &cache, &tool).build(&graph).unwrap();
    Orchestrator::new(&debug, &cache, &tool).build(&graph).unwrap();

    assert_eq!(tool.calls(), 6);
}

#[test]
fn test_size_limit_never_evicts_artifacts_of_the_run() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir).with_jobs(1).with_cache_size_limit(1);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();

    let report = Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();
    assert_eq!(report.stats().built, 3);
    for unit in &report.units {
        let artifact = unit.artifact.as_ref().unwrap();
        assert!(artifact.exists(), "{} evicted during its run", unit.library);
    }
    assert_eq!(cache.stats().unwrap().entries, 3);

    let again = Orchestrator::new(&config, &cache, &tool).build(&graph).unwrap();
    assert_eq!(again.stats().cached, 3);
    assert_eq!(tool.calls(), 3);
}

#[test]
fn test_panicking_tool_fails_its_unit() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let config = config(&cache_dir).with_jobs(2);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new().panic_on("Log");

    let report = Orchestrator::new(&config, &cache, &tool).run(&graph).unwrap();

    assert_eq!(report.unit("Util", Platform::Ios).unwrap().outcome, UnitOutcome::Built);
    match &report.unit("Log", Platform::Ios).unwrap().outcome {
        UnitOutcome::Failed(reason) => assert!(reason.contains("Log tool crashed"), "{}", reason),
        other => panic!("expected a failure, got {:?}", other),
    }
    assert!(matches!(
        report.unit("Net", Platform::Ios).unwrap().outcome,
        UnitOutcome::Skipped(_)
    ));

    let leftovers = fs::read_dir(cache_dir.path().join("tmp")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_unknown_toolchain_refuses_to_build() {
    let fixture = diamond();
    let graph = fixture.graph();
    let cache_dir = TempDir::new().unwrap();
    let config = EngineConfig::new(cache_dir.path());
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();

    let result = Orchestrator::new(&config, &cache, &tool).run(&graph);
    assert!(matches!(result, Err(BuildError::ToolchainUnknown)));
    assert_eq!(tool.calls(), 0);
    assert_eq!(cache.stats().unwrap().entries, 0);
}
