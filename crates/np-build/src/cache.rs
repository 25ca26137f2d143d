//! Verification cache.
//!
//! Verdicts are keyed by `(kernel version, driver, sha256(patch), source
//! commit)`. On disk each slot is addressed by driver, version and a prefix
//! of the patch hash; the entry inside records the full hash and the source
//! commit, and is ignored unless both match the lookup. A later build for
//! the same slot overwrites a stale entry.
//!
//! Layout: `<root>/<driver>/<canonical version>/<sha256[0:16]>/`
//! - `entry.json`: metadata and verdict status
//! - `patch`: the patch content that was built
//! - `build.log`: full build output

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use np_vers::{DriverKey, VersionId};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::verdict::BuildVerdict;

/// Lookup key for a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub version: VersionId,
    pub driver: DriverKey,
    pub patch_sha256: String,
    pub source_commit: String,
}

impl CacheKey {
    pub fn new(version: VersionId, driver: DriverKey, patch_content: impl AsRef<[u8]>, source_commit: &str) -> Self {
        Self {
            version,
            driver,
            patch_sha256: crate::content_sha256(patch_content),
            source_commit: source_commit.to_string(),
        }
    }
}

/// A stored verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Name of the patch that produced the entry (informational only).
    pub patch_id: String,
    /// Content of the patch that was built.
    #[serde(skip)]
    pub patch_content: Vec<u8>,
    pub verdict: BuildVerdict,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, patch_id: &str, patch_content: impl AsRef<[u8]>, verdict: BuildVerdict) -> Self {
        Self {
            key,
            patch_id: patch_id.to_string(),
            patch_content: patch_content.as_ref().to_vec(),
            verdict,
            created_at: Utc::now(),
        }
    }

    /// Returns true if this entry answers `key`.
    pub fn matches(&self, key: &CacheKey) -> bool {
        self.key == *key && crate::content_sha256(&self.patch_content) == key.patch_sha256
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub failed: usize,
    pub warned: usize,
}

/// Verdict memo.
pub trait VerdictCache {
    /// Return the stored entry if it matches `key` exactly.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Store an entry, replacing whatever occupied its slot.
    fn put(&self, entry: &CacheEntry) -> CacheResult<()>;

    /// Drop all entries, or only those of one driver. Returns the count.
    fn clear(&self, driver: Option<&str>) -> CacheResult<usize>;

    /// Summary counts, optionally restricted to one driver.
    fn stats(&self, driver: Option<&str>) -> CacheResult<CacheStats>;

    /// Where the build log for `key` is kept, if logs live on disk.
    fn log_location(&self, _key: &CacheKey) -> Option<PathBuf> {
        None
    }
}

/// Directory-backed verdict cache.
#[derive(Debug, Clone)]
pub struct DirVerdictCache {
    root: PathBuf,
}

impl DirVerdictCache {
    pub const ENTRY_FILENAME: &'static str = "entry.json";
    pub const PATCH_FILENAME: &'static str = "patch";
    pub const LOG_FILENAME: &'static str = "build.log";

    /// Create a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the entry for `key`.
    pub fn slot_path(&self, key: &CacheKey) -> PathBuf {
        let prefix = &key.patch_sha256[..16.min(key.patch_sha256.len())];
        self.root
            .join(key.driver.field())
            .join(key.version.canonical())
            .join(prefix)
    }

    /// Path of the build log for `key`, if one is stored.
    pub fn log_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.slot_path(key).join(Self::LOG_FILENAME);
        path.exists().then_some(path)
    }

    fn read_slot(&self, slot: &Path) -> CacheResult<Option<CacheEntry>> {
        let meta_path = slot.join(Self::ENTRY_FILENAME);
        let patch_path = slot.join(Self::PATCH_FILENAME);
        if !meta_path.exists() || !patch_path.exists() {
            return Ok(None);
        }

        let meta = fs::read_to_string(&meta_path)?;
        let mut entry: CacheEntry = serde_json::from_str(&meta).map_err(|e| CacheError::InvalidEntry {
            path: meta_path.display().to_string(),
            reason: e.to_string(),
        })?;
        entry.patch_content = fs::read(&patch_path)?;
        let log_path = slot.join(Self::LOG_FILENAME);
        if log_path.exists() {
            entry.verdict.log = fs::read_to_string(&log_path)?;
        }
        Ok(Some(entry))
    }

    /// Every entry under `dir`, walking driver/version/hash levels.
    fn collect_entries(&self, dir: &Path) -> CacheResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }
        for item in walkdir::WalkDir::new(dir).min_depth(1) {
            let item = item.map_err(|e| CacheError::Io(e.into()))?;
            if item.file_type().is_file() && item.file_name() == Self::ENTRY_FILENAME {
                if let Some(slot) = item.path().parent() {
                    // Unreadable entries are skipped: the cache is never a source of truth.
                    match self.read_slot(slot) {
                        Ok(Some(entry)) => entries.push(entry),
                        Ok(None) => {}
                        Err(e) => tracing::warn!(slot = %slot.display(), error = %e, "skipping unreadable cache entry"),
                    }
                }
            }
        }
        Ok(entries)
    }

    fn driver_dirs(&self, driver: Option<&str>) -> CacheResult<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for item in fs::read_dir(&self.root)? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            let name_only = name.split(':').next().unwrap_or(&name);
            if driver.map_or(true, |d| d == name_only) {
                dirs.push(item.path());
            }
        }
        Ok(dirs)
    }
}

impl VerdictCache for DirVerdictCache {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let slot = self.slot_path(key);
        let entry = match self.read_slot(&slot)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.matches(key) {
            Ok(Some(entry))
        } else {
            tracing::debug!(slot = %slot.display(), "stale cache entry ignored");
            Ok(None)
        }
    }

    fn put(&self, entry: &CacheEntry) -> CacheResult<()> {
        let slot = self.slot_path(&entry.key);
        fs::create_dir_all(&slot)?;

        fs::write(slot.join(Self::PATCH_FILENAME), &entry.patch_content)?;
        fs::write(slot.join(Self::LOG_FILENAME), &entry.verdict.log)?;

        // Metadata last, written then renamed, so a torn write never looks valid.
        let mut meta = entry.clone();
        meta.verdict.log.clear();
        let json = serde_json::to_string_pretty(&meta)?;
        let temp_path = slot.join(format!("{}.tmp", Self::ENTRY_FILENAME));
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, slot.join(Self::ENTRY_FILENAME))?;
        Ok(())
    }

    fn clear(&self, driver: Option<&str>) -> CacheResult<usize> {
        let mut removed = 0;
        for dir in self.driver_dirs(driver)? {
            removed += self.collect_entries(&dir)?.len();
            fs::remove_dir_all(&dir)?;
        }
        Ok(removed)
    }

    fn stats(&self, driver: Option<&str>) -> CacheResult<CacheStats> {
        let mut stats = CacheStats::default();
        for dir in self.driver_dirs(driver)? {
            for entry in self.collect_entries(&dir)? {
                stats.entries += 1;
                if !entry.verdict.ok {
                    stats.failed += 1;
                } else if entry.verdict.warned {
                    stats.warned += 1;
                }
            }
        }
        Ok(stats)
    }

    fn log_location(&self, key: &CacheKey) -> Option<PathBuf> {
        self.log_path(key)
    }
}

/// In-memory verdict cache, one entry per slot like the directory cache.
#[derive(Debug, Default)]
pub struct MemoryVerdictCache {
    slots: Mutex<HashMap<(String, VersionId, String), CacheEntry>>,
}

impl MemoryVerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(key: &CacheKey) -> (String, VersionId, String) {
        (key.driver.field(), key.version, key.patch_sha256.clone())
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VerdictCache for MemoryVerdictCache {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let slots = self.slots.lock().map_err(poisoned)?;
        Ok(slots.get(&Self::slot(key)).filter(|e| e.matches(key)).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> CacheResult<()> {
        let mut slots = self.slots.lock().map_err(poisoned)?;
        slots.insert(Self::slot(&entry.key), entry.clone());
        Ok(())
    }

    fn clear(&self, driver: Option<&str>) -> CacheResult<usize> {
        let mut slots = self.slots.lock().map_err(poisoned)?;
        let before = slots.len();
        slots.retain(|_, e| driver.map_or(false, |d| e.key.driver.name != d));
        Ok(before - slots.len())
    }

    fn stats(&self, driver: Option<&str>) -> CacheResult<CacheStats> {
        let slots = self.slots.lock().map_err(poisoned)?;
        let mut stats = CacheStats::default();
        for entry in slots.values() {
            if driver.map_or(false, |d| entry.key.driver.name != d) {
                continue;
            }
            stats.entries += 1;
            if !entry.verdict.ok {
                stats.failed += 1;
            } else if entry.verdict.warned {
                stats.warned += 1;
            }
        }
        Ok(stats)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> CacheError {
    CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "cache lock poisoned"))
}
