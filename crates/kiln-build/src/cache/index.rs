//! On-disk cache index (index.json)

use crate::error::{BuildError, BuildResult};
use crate::targets::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Index format version
pub const INDEX_VERSION: u32 = 1;

/// A stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Artifact location; relative to the cache root inside the index
    pub artifact_path: PathBuf,
    /// Commit the artifact was built from
    pub revision: String,
    /// Content signature of the checkout at build time
    pub signature: String,
    /// Artifact size in bytes
    pub size: u64,
    pub stored_at: DateTime<Utc>,
    /// Index tick of the most recent store or hit
    pub last_used: u64,
    /// Built from a branch tip
    pub mutable: bool,
}

/// Persistent mapping from key digest to entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    pub version: u32,
    /// Monotonic use counter driving LRU order
    pub tick: u64,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            tick: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    /// Load the index, checking it against the artifacts on disk
    ///
    /// A missing index is an empty cache. Anything unreadable or inconsistent
    /// is reported as [`BuildError::CacheCorrupt`].
    pub fn load(path: &Path, root: &Path) -> BuildResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(BuildError::corrupt(format!("{}: {}", path.display(), e))),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let index: Self = serde_json::from_str(&content)
            .map_err(|e| BuildError::corrupt(format!("{}: {}", path.display(), e)))?;

        if index.version != INDEX_VERSION {
            return Err(BuildError::corrupt(format!(
                "unsupported index version {}",
                index.version
            )));
        }

        for (digest, entry) in &index.entries {
            if *digest != entry.key.digest() {
                return Err(BuildError::corrupt(format!(
                    "entry for {} is filed under the wrong digest",
                    entry.key
                )));
            }
            if !root.join(&entry.artifact_path).exists() {
                return Err(BuildError::corrupt(format!(
                    "artifact for {} is missing",
                    entry.key
                )));
            }
        }

        Ok(index)
    }

    /// Write the index atomically
    pub fn save(&self, path: &Path) -> BuildResult<()> {
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::CacheError(e.to_string()))?;
        fs::write(&tmp, content).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| BuildError::io(path, e))?;
        Ok(())
    }

    pub fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    /// Digest of the least recently used entry not in `keep`
    pub fn least_recently_used(&self, keep: &HashSet<String>) -> Option<String> {
        self.entries
            .iter()
            .filter(|(digest, _)| !keep.contains(digest.as_str()))
            .min_by(|(da, a), (db, b)| a.last_used.cmp(&b.last_used).then_with(|| da.cmp(db)))
            .map(|(digest, _)| digest.clone())
    }
}
