//! Build-tool collaborator
//!
//! The orchestrator never compiles anything itself. It hands a
//! [`BuildRequest`] to a [`BuildTool`] and expects an artifact path back.

use crate::error::{BuildError, BuildResult};
use kiln_config::{BuildConfiguration, EngineConfig};
use kiln_package::Platform;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Everything needed to build one library for one platform
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Checkout of the package that owns the library
    pub checkout_path: PathBuf,
    pub library: String,
    /// Targets of the package that make up the library
    pub targets: Vec<String>,
    pub platform: Platform,
    pub toolchain_version: String,
    pub configuration: BuildConfiguration,
    /// Fresh, empty directory the tool may write into
    pub output_dir: PathBuf,
    /// Artifacts of the library's dependencies, already built
    pub dependencies: Vec<PathBuf>,
}

impl BuildRequest {
    /// Environment exported to command-based tools
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("KILN_CHECKOUT".to_string(), self.checkout_path.display().to_string());
        env.insert("KILN_LIBRARY".to_string(), self.library.clone());
        env.insert("KILN_PLATFORM".to_string(), self.platform.to_string());
        env.insert("KILN_TOOLCHAIN".to_string(), self.toolchain_version.clone());
        env.insert("KILN_CONFIGURATION".to_string(), self.configuration.to_string());
        env.insert("KILN_OUTPUT".to_string(), self.output_dir.display().to_string());
        env.insert("KILN_DEPENDENCIES".to_string(), join_paths(&self.dependencies));
        env
    }
}

/// Produces an artifact for a [`BuildRequest`]
pub trait BuildTool: Send + Sync {
    fn build(&self, request: &BuildRequest) -> BuildResult<PathBuf>;
}

/// Runs a shell command template per build
///
/// Placeholders: `{checkout}`, `{library}`, `{platform}`, `{toolchain}`,
/// `{configuration}`, `{output}` and `{dependencies}` (space separated).
/// The artifact is whatever the command leaves in the output directory.
#[derive(Debug, Clone)]
pub struct CommandBuildTool {
    template: String,
}

impl CommandBuildTool {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The command line for a request
    pub fn render(&self, request: &BuildRequest) -> String {
        self.template
            .replace("{checkout}", &request.checkout_path.display().to_string())
            .replace("{library}", &request.library)
            .replace("{platform}", request.platform.as_str())
            .replace("{toolchain}", &request.toolchain_version)
            .replace("{configuration}", request.configuration.as_str())
            .replace("{output}", &request.output_dir.display().to_string())
            .replace("{dependencies}", &join_paths(&request.dependencies))
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

impl BuildTool for CommandBuildTool {
    fn build(&self, request: &BuildRequest) -> BuildResult<PathBuf> {
        let command = self.render(request);
        debug!(library = %request.library, platform = %request.platform, %command, "running build command");

        let output = Self::shell(&command)
            .current_dir(&request.checkout_path)
            .envs(request.environment())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| BuildError::ToolFailed(format!("failed to spawn '{}': {}", command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(BuildError::build_failed(
                &request.library,
                request.platform,
                format!("command exited with {}: {}", code, stderr.trim()),
            ));
        }

        if is_empty_dir(&request.output_dir)? {
            return Err(BuildError::build_failed(
                &request.library,
                request.platform,
                "command produced no output",
            ));
        }

        Ok(request.output_dir.clone())
    }
}

/// Run a version command and return the first non-empty line it prints
pub fn detect_toolchain(command: &str) -> BuildResult<String> {
    debug!(%command, "detecting toolchain version");
    let output = CommandBuildTool::shell(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| BuildError::ToolFailed(format!("failed to spawn '{}': {}", command, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BuildError::ToolFailed(format!(
            "'{}' failed: {}",
            command,
            stderr.trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BuildError::ToolFailed(format!("'{}' printed no version", command)))
}

/// Fill in the toolchain version from `toolchain_command` when it is unset
pub fn ensure_toolchain(config: &mut EngineConfig) -> BuildResult<&str> {
    if config.toolchain_version.is_none() {
        let version = detect_toolchain(&config.toolchain_command)?;
        info!(toolchain = %version, "detected toolchain");
        config.toolchain_version = Some(version);
    }
    config
        .toolchain_version
        .as_deref()
        .ok_or(BuildError::ToolchainUnknown)
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_empty_dir(dir: &Path) -> BuildResult<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(BuildError::io(dir, e)),
    }
}
