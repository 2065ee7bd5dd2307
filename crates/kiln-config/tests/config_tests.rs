//! Configuration loading and precedence tests

use kiln_config::{BuildConfiguration, ConfigError, ConfigLoader};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.toml");
    fs::write(&path, content).unwrap();
    path
}

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_file_then_env_then_builder() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        temp_dir.path(),
        r#"
[cache]
path = "/var/cache/kiln"
max-size = 1048576
branch-max-age = 600

[build]
jobs = 2
toolchain = "5.8"
configuration = "debug"
"#,
    );

    let config = ConfigLoader::new()
        .with_global_config_path(&path)
        .with_env(env(&[("KILN_TOOLCHAIN", "5.9"), ("KILN_JOBS", "6")]))
        .load()
        .unwrap();

    assert_eq!(config.cache_dir, PathBuf::from("/var/cache/kiln"));
    assert_eq!(config.cache_size_limit, Some(1_048_576));
    assert_eq!(config.branch_max_age, Duration::from_secs(600));
    assert_eq!(config.toolchain_version.as_deref(), Some("5.9"));
    assert_eq!(config.jobs, 6);
    assert_eq!(config.configuration, BuildConfiguration::Debug);

    let config = config.with_configuration(BuildConfiguration::Release).with_jobs(1);
    assert_eq!(config.configuration, BuildConfiguration::Release);
    assert_eq!(config.jobs, 1);
}

#[test]
fn test_empty_env_values_are_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(temp_dir.path(), "[build]\ntoolchain = \"5.8\"\n");

    let config = ConfigLoader::new()
        .with_global_config_path(&path)
        .with_env(env(&[("KILN_TOOLCHAIN", "")]))
        .load()
        .unwrap();
    assert_eq!(config.toolchain_version.as_deref(), Some("5.8"));
}

#[test]
fn test_invalid_configuration_env() {
    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::new()
        .with_global_config_path(temp_dir.path().join("missing.toml"))
        .with_env(env(&[("KILN_CONFIGURATION", "profile")]))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "KILN_CONFIGURATION"));
}

#[test]
fn test_malformed_file_names_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(temp_dir.path(), "[cache\npath = 1");

    let err = ConfigLoader::new()
        .with_global_config_path(&path)
        .with_env(HashMap::new())
        .load()
        .unwrap_err();
    match err {
        ConfigError::TomlParseError { file, .. } => assert_eq!(file, path),
        other => panic!("expected TomlParseError, got {:?}", other),
    }
}
