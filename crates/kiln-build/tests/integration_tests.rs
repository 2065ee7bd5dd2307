mod common;

use common::{CountingTool, Fixture};
use kiln_build::{
    integrate, ArtifactCache, BuildReport, BuildResult, DependenciesDirIntegrator, Orchestrator,
    ProjectIntegrator,
};
use kiln_config::EngineConfig;
use kiln_package::RootTarget;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingSink {
    references: Vec<(String, String)>,
    finished: bool,
}

impl ProjectIntegrator for RecordingSink {
    fn add_artifact_reference(
        &mut self,
        _project: &Path,
        target: &RootTarget,
        artifact: &Path,
    ) -> BuildResult<()> {
        let name = artifact.file_name().unwrap().to_string_lossy().to_string();
        self.references.push((target.name.clone(), name));
        Ok(())
    }

    fn finish(&mut self, _project: &Path) -> BuildResult<()> {
        self.finished = true;
        Ok(())
    }
}

fn build(fixture: &Fixture, cache_dir: &TempDir) -> BuildReport {
    let config = EngineConfig::new(cache_dir.path()).with_toolchain("T1").with_jobs(2);
    let cache = ArtifactCache::from_config(&config).unwrap();
    let tool = CountingTool::new();
    Orchestrator::new(&config, &cache, &tool)
        .build(&fixture.graph())
        .unwrap()
}

#[test]
fn test_every_root_target_gets_its_closure_in_build_order() {
    let fixture = Fixture::new()
        .root(&[("App", "ios", &["Net"]), ("Watch", "watchos", &["Log"])])
        .library("Net", "n1", &["Log"])
        .library("Log", "l1", &[]);
    let cache_dir = TempDir::new().unwrap();
    let report = build(&fixture, &cache_dir);
    let project = TempDir::new().unwrap();

    let mut sink = RecordingSink::default();
    let count = integrate(&report, &fixture.graph(), project.path(), &mut sink).unwrap();

    assert_eq!(count, 3);
    assert!(sink.finished);
    assert_eq!(
        sink.references,
        vec![
            ("App".to_string(), "Log".to_string()),
            ("App".to_string(), "Net".to_string()),
            ("Watch".to_string(), "Log".to_string()),
        ]
    );
}

#[test]
fn test_dependencies_dir_layout() {
    let fixture = Fixture::new()
        .root(&[("App", "ios", &["Net"])])
        .library("Net", "n1", &[]);
    let cache_dir = TempDir::new().unwrap();
    let report = build(&fixture, &cache_dir);
    let project = TempDir::new().unwrap();

    let mut sink = DependenciesDirIntegrator::new();
    integrate(&report, &fixture.graph(), project.path(), &mut sink).unwrap();

    let copied: PathBuf = project.path().join("Dependencies/ios/Net/Net");
    assert!(copied.exists());
    assert_eq!(
        sink.references()["App"],
        vec!["Dependencies/ios/Net".to_string()]
    );
    assert!(project.path().join("Dependencies/references.json").exists());
}

#[test]
fn test_missing_artifact_is_reported() {
    let fixture = Fixture::new()
        .root(&[("App", "ios", &["Net"])])
        .library("Net", "n1", &[]);
    let project = TempDir::new().unwrap();
    let mut sink = RecordingSink::default();

    let err = integrate(&BuildReport::default(), &fixture.graph(), project.path(), &mut sink)
        .unwrap_err();
    assert!(err.to_string().contains("Net"));
    assert!(!sink.finished);
}
