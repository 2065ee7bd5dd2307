//! Persistent artifact cache
//!
//! Layout under the cache root:
//!
//! ```text
//! index.json                 key digest -> entry
//! index.lock                 advisory lock held while the index is read and rewritten
//! locks/<digest>.lock        advisory lock held while one key is looked up and built
//! artifacts/<digest>/<name>  stored artifacts
//! tmp/                       staging for stores and builds
//! ```
//!
//! Keys requested through [`ArtifactCache::get_or_build`] are pinned: LRU
//! eviction skips them until [`ArtifactCache::release_pins`] is called, so a
//! build run never loses the artifacts it has already handed out.

mod flight;
mod index;

pub use flight::{FlightGuard, SingleFlight};
pub use index::{CacheEntry, CacheIndex, INDEX_VERSION};

use crate::error::{BuildError, BuildResult};
use crate::targets::CacheKey;
use chrono::Utc;
use fs4::FileExt;
use kiln_config::EngineConfig;
use kiln_package::is_path_segment;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "index.lock";
const ARTIFACTS_DIR: &str = "artifacts";
const TMP_DIR: &str = "tmp";
const LOCKS_DIR: &str = "locks";

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Cache usage summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
}

/// Where a [`ArtifactCache::get_or_build`] result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Entry was already stored
    Hit,
    /// The build closure ran and its artifact was stored
    Stored,
}

/// Artifact cache rooted at one directory
pub struct ArtifactCache {
    root: PathBuf,
    size_limit: Option<u64>,
    branch_max_age: Duration,
    index_lock: Mutex<()>,
    flights: SingleFlight,
    pinned: Mutex<HashSet<String>>,
}

impl ArtifactCache {
    /// Open (and create) a cache directory
    pub fn open(root: impl Into<PathBuf>) -> BuildResult<Self> {
        let root = root.into();
        for dir in [
            root.clone(),
            root.join(ARTIFACTS_DIR),
            root.join(TMP_DIR),
            root.join(LOCKS_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
        }

        Ok(Self {
            root,
            size_limit: None,
            branch_max_age: kiln_config::engine::DEFAULT_BRANCH_MAX_AGE,
            index_lock: Mutex::new(()),
            flights: SingleFlight::new(),
            pinned: Mutex::new(HashSet::new()),
        })
    }

    /// Open the local cache described by an engine config
    pub fn from_config(config: &EngineConfig) -> BuildResult<Self> {
        let mut cache = Self::open(&config.cache_dir)?.with_branch_max_age(config.branch_max_age);
        cache.size_limit = config.cache_size_limit;
        Ok(cache)
    }

    /// Open the shared cache of an engine config, if one is configured
    pub fn shared_from_config(config: &EngineConfig) -> BuildResult<Option<Self>> {
        config
            .shared_cache_dir
            .as_ref()
            .map(|dir| Ok(Self::open(dir)?.with_branch_max_age(config.branch_max_age)))
            .transpose()
    }

    /// Bound the total artifact size in bytes
    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// How long artifacts built from a branch tip stay valid
    pub fn with_branch_max_age(mut self, max_age: Duration) -> Self {
        self.branch_max_age = max_age;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find a valid entry for `key`
    ///
    /// Entries whose checkout signature differs, or branch entries older than
    /// the branch max age, are evicted and reported as a miss.
    pub fn lookup(&self, key: &CacheKey, signature: &str) -> BuildResult<Option<CacheEntry>> {
        let digest = key.digest();
        let max_age = self.branch_max_age;

        self.with_index(|index, root| {
            let Some(entry) = index.entries.get(&digest) else {
                return Ok(None);
            };

            let stale = if entry.key != *key {
                Some("key mismatch")
            } else if entry.signature != signature {
                Some("checkout content changed")
            } else if entry.mutable && is_expired(entry, max_age) {
                Some("branch artifact expired")
            } else {
                None
            };

            if let Some(reason) = stale {
                debug!(%key, reason, "evicting stale cache entry");
                remove_entry(index, root, &digest)?;
                return Ok(None);
            }

            let tick = index.next_tick();
            let Some(entry) = index.entries.get_mut(&digest) else {
                return Ok(None);
            };
            entry.last_used = tick;
            debug!(%key, "cache hit");
            Ok(Some(absolute(entry, root)))
        })
    }

    /// Copy an artifact into the cache and record it
    ///
    /// Replaces any previous entry for the key wholesale. If a size limit is
    /// set, least recently used entries are evicted until the new total fits.
    /// The new entry and pinned entries are never evicted.
    pub fn store(
        &self,
        key: &CacheKey,
        artifact: &Path,
        signature: &str,
        mutable: bool,
    ) -> BuildResult<CacheEntry> {
        if !is_path_segment(&key.library) {
            return Err(BuildError::CacheError(format!(
                "library name '{}' cannot be stored",
                key.library
            )));
        }

        let digest = key.digest();
        let staging = StagingDir::new(self.staging_dir(&digest));
        let size = copy_artifact(artifact, &staging.path().join(&key.library))?;

        let limit = self.size_limit;
        self.with_index(|index, root| {
            let relative = PathBuf::from(ARTIFACTS_DIR).join(&digest);
            let final_dir = root.join(&relative);
            if index.entries.contains_key(&digest) {
                remove_entry(index, root, &digest)?;
            } else if final_dir.exists() {
                fs::remove_dir_all(&final_dir).map_err(|e| BuildError::io(&final_dir, e))?;
            }
            fs::rename(staging.path(), &final_dir).map_err(|e| BuildError::io(&final_dir, e))?;

            let entry = CacheEntry {
                key: key.clone(),
                artifact_path: relative.join(&key.library),
                revision: key.revision.clone(),
                signature: signature.to_string(),
                size,
                stored_at: Utc::now(),
                last_used: index.next_tick(),
                mutable,
            };
            index.entries.insert(digest.clone(), entry.clone());

            if let Some(limit) = limit {
                let mut keep = self.pinned_digests();
                keep.insert(digest.clone());
                while index.total_size() > limit {
                    let Some(victim) = index.least_recently_used(&keep) else {
                        warn!(limit, total = index.total_size(), "cache over its size limit, remaining entries are in use");
                        break;
                    };
                    warn!(evicted = %index.entries[&victim].key, limit, "cache size limit reached, evicting");
                    remove_entry(index, root, &victim)?;
                }
            }

            info!(%key, size, "stored artifact");
            Ok(absolute(&entry, root))
        })
    }

    /// Remove every entry matching `predicate`; returns how many were removed
    pub fn invalidate(&self, predicate: impl Fn(&CacheEntry) -> bool) -> BuildResult<usize> {
        self.with_index(|index, root| {
            let victims: Vec<String> = index
                .entries
                .iter()
                .filter(|(_, entry)| predicate(entry))
                .map(|(digest, _)| digest.clone())
                .collect();
            for digest in &victims {
                remove_entry(index, root, digest)?;
            }
            Ok(victims.len())
        })
    }

    pub fn stats(&self) -> BuildResult<CacheStats> {
        self.with_index(|index, _| {
            Ok(CacheStats {
                entries: index.entries.len(),
                total_size: index.total_size(),
            })
        })
    }

    /// Remove every entry and artifact
    pub fn clear(&self) -> BuildResult<()> {
        self.with_index(|index, root| {
            *index = CacheIndex::default();
            reset_dirs(root)
        })
    }

    /// Serialize builds of one key; see [`SingleFlight`]
    pub fn acquire(&self, key: &CacheKey) -> FlightGuard<'_> {
        self.flights.acquire(key)
    }

    /// Keep `key`'s entry out of LRU eviction until [`Self::release_pins`]
    pub fn pin(&self, key: &CacheKey) {
        self.pinned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.digest());
    }

    /// Make every pinned entry evictable again
    pub fn release_pins(&self) {
        self.pinned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn pinned_digests(&self) -> HashSet<String> {
        self.pinned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the entry for `key`, running `build` only if it is missing
    ///
    /// Concurrent callers with the same key share one build, in this process
    /// through [`SingleFlight`] and across processes through a per-key file
    /// lock. A failed build is not cached; the next waiter runs `build`
    /// itself. The key stays pinned afterwards.
    pub fn get_or_build<F>(
        &self,
        key: &CacheKey,
        signature: &str,
        mutable: bool,
        build: F,
    ) -> BuildResult<(CacheEntry, Lookup)>
    where
        F: FnOnce() -> BuildResult<PathBuf>,
    {
        self.pin(key);
        let _guard = self.acquire(key);
        let _key_lock = self.lock_key(&key.digest())?;
        if let Some(entry) = self.lookup(key, signature)? {
            return Ok((entry, Lookup::Hit));
        }

        let artifact = build()?;
        let entry = self.store(key, &artifact, signature, mutable)?;
        Ok((entry, Lookup::Stored))
    }

    /// Fresh scratch directory inside the cache
    pub fn staging_dir(&self, label: &str) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TMP_DIR)
            .join(format!("{}-{}-{}", label, std::process::id(), n))
    }

    /// Run `f` on the index with both the in-process and the file lock held,
    /// then write it back
    fn with_index<R>(
        &self,
        f: impl FnOnce(&mut CacheIndex, &Path) -> BuildResult<R>,
    ) -> BuildResult<R> {
        let _local = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = self.lock_file()?;

        let index_path = self.root.join(INDEX_FILE);
        let mut index = match CacheIndex::load(&index_path, &self.root) {
            Ok(index) => index,
            Err(BuildError::CacheCorrupt(reason)) => {
                warn!(cache = %self.root.display(), %reason, "cache index corrupt, rebuilding from scratch");
                reset_dirs(&self.root)?;
                CacheIndex::default()
            }
            Err(e) => return Err(e),
        };

        // Saved even when `f` fails so entries it already removed stay removed.
        let result = f(&mut index, &self.root);
        index.save(&index_path)?;
        drop(lock);
        result
    }

    fn lock_file(&self) -> BuildResult<File> {
        exclusive_lock(&self.root.join(LOCK_FILE))
    }

    fn lock_key(&self, digest: &str) -> BuildResult<File> {
        let dir = self.root.join(LOCKS_DIR);
        fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
        exclusive_lock(&dir.join(format!("{}.lock", digest)))
    }
}

/// Scratch directory removed when dropped
#[derive(Debug)]
pub(crate) struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(err) = fs::remove_dir_all(&self.path) {
                debug!(path = %self.path.display(), error = %err, "could not remove staging dir");
            }
        }
    }
}

fn exclusive_lock(path: &Path) -> BuildResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| BuildError::io(path, e))?;
    file.lock_exclusive().map_err(|e| BuildError::io(path, e))?;
    Ok(file)
}

fn absolute(entry: &CacheEntry, root: &Path) -> CacheEntry {
    let mut entry = entry.clone();
    entry.artifact_path = root.join(&entry.artifact_path);
    entry
}

fn is_expired(entry: &CacheEntry, max_age: Duration) -> bool {
    let age = Utc::now().signed_duration_since(entry.stored_at);
    age.to_std().map(|age| age > max_age).unwrap_or(false)
}

fn remove_entry(index: &mut CacheIndex, root: &Path, digest: &str) -> BuildResult<()> {
    index.entries.remove(digest);
    let dir = root.join(ARTIFACTS_DIR).join(digest);
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
    }
    Ok(())
}

fn reset_dirs(root: &Path) -> BuildResult<()> {
    let artifacts = root.join(ARTIFACTS_DIR);
    if artifacts.exists() {
        fs::remove_dir_all(&artifacts).map_err(|e| BuildError::io(&artifacts, e))?;
    }
    fs::create_dir_all(&artifacts).map_err(|e| BuildError::io(&artifacts, e))?;
    fs::create_dir_all(root.join(TMP_DIR)).map_err(|e| BuildError::io(root.join(TMP_DIR), e))?;
    Ok(())
}

/// Copy a file or directory tree to `dest`, returning the bytes copied
pub(crate) fn copy_artifact(source: &Path, dest: &Path) -> BuildResult<u64> {
    let metadata = fs::metadata(source).map_err(|e| BuildError::io(source, e))?;
    if metadata.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        return fs::copy(source, dest).map_err(|e| BuildError::io(source, e));
    }

    let mut size = 0;
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|e| BuildError::io(source, e.into()))?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| BuildError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
            }
            size += fs::copy(entry.path(), &target).map_err(|e| BuildError::io(entry.path(), e))?;
        }
    }
    Ok(size)
}
