//! Lightweight content signatures for checkouts

use crate::error::{BuildError, BuildResult};
use kiln_package::CHECKOUT_MARKER;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

const IGNORED: &[&str] = &[".git", ".hg", ".svn", CHECKOUT_MARKER];

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED.contains(&name))
}

/// SHA-256 over the sorted relative paths and contents of a checkout
///
/// Version-control metadata and the checkout marker are skipped, so the
/// signature only changes when tracked content does.
pub fn source_signature(root: &Path) -> BuildResult<String> {
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            BuildError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let relative = relative.to_string_lossy().replace('\\', "/");
        let contents = fs::read(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;

        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
