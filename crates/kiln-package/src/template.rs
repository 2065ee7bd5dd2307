//! Default manifest template

use crate::manifest::{Platform, MANIFEST_FILE};
use crate::Result;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info};

/// Minimal starting manifest for a project and its targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    project: String,
    targets: Vec<String>,
}

impl ManifestTemplate {
    pub fn new(project: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            project: project.into(),
            targets,
        }
    }

    /// Render the manifest text
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Kiln manifest\n");
        out.push_str("#\n");
        out.push_str("# Declare packages and reference their libraries from targets:\n");
        out.push_str("#\n");
        out.push_str("# [[packages]]\n");
        out.push_str("# url = \"https://github.com/Alamofire/Alamofire.git\"\n");
        out.push_str("# version = \"^5.0.0\"\n\n");

        let _ = writeln!(out, "[project]");
        let _ = writeln!(out, "name = {}", quote(&self.project));

        for target in &self.targets {
            let platform = Platform::infer_from_name(target);
            out.push('\n');
            let _ = writeln!(out, "[[targets]]");
            let _ = writeln!(out, "name = {}", quote(target));
            let _ = writeln!(out, "platform = \"{}\"", platform);
            if target.ends_with("Tests") {
                let _ = writeln!(out, "kind = \"test\"");
            }
            let _ = writeln!(out, "dependencies = []");
        }

        out
    }

    /// Write the template into `dir` unless a manifest already exists
    ///
    /// Returns whether a file was written.
    pub fn create_if_absent(&self, dir: &Path) -> Result<bool> {
        let path = dir.join(MANIFEST_FILE);
        if path.exists() {
            debug!(path = %path.display(), "manifest exists, leaving it untouched");
            return Ok(false);
        }

        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, self.render())?;
        info!(path = %path.display(), "created manifest");
        Ok(true)
    }
}

fn quote(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}
