//! kiln init

use super::project_dir;
use crate::GlobalArgs;
use anyhow::{Context, Result};
use kiln_package::{ManifestTemplate, MANIFEST_FILE};
use std::fs;

pub fn run(global: &GlobalArgs, name: Option<String>, targets: Vec<String>) -> Result<()> {
    let dir = project_dir(global)?;
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let name = match name {
        Some(name) => name,
        None => dir
            .canonicalize()
            .ok()
            .and_then(|d| d.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "App".to_string()),
    };
    let targets = if targets.is_empty() {
        vec![name.clone()]
    } else {
        targets
    };

    let created = ManifestTemplate::new(name, targets)
        .create_if_absent(&dir)
        .context("Failed to write manifest")?;

    if created {
        println!("Created {}", dir.join(MANIFEST_FILE).display());
    } else {
        println!("{} already exists, left unchanged", MANIFEST_FILE);
    }
    Ok(())
}
