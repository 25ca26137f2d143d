//! Driver location inside kernel trees.
//!
//! A driver is either a directory named after it or a single `<name>.c`
//! file somewhere under the network driver subtree. Lookups are memoized
//! per (version, driver), including misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use np_vers::{DriverKey, VersionId};
use serde::Serialize;
use walkdir::WalkDir;

use crate::provision::{KernelProvisioner, ProvisionResult};

/// Where a driver lives in one kernel tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverLocation {
    /// Root of the provisioned tree.
    pub tree: PathBuf,
    /// Directory patches are relative to, relative to `tree`.
    pub base: PathBuf,
    /// The driver directory or file, relative to `tree`.
    pub target: PathBuf,
}

impl DriverLocation {
    /// Absolute path of `base`.
    pub fn base_dir(&self) -> PathBuf {
        self.tree.join(&self.base)
    }

    pub fn is_single_file(&self) -> bool {
        self.base != self.target
    }
}

type MemoKey = (VersionId, DriverKey);

/// Finds drivers in provisioned trees.
pub struct DriverLocator {
    provisioner: Arc<dyn KernelProvisioner>,
    net_subtree: PathBuf,
    /// Explicit paths for drivers that skip the search.
    overrides: HashMap<String, PathBuf>,
    memo: Mutex<HashMap<MemoKey, Option<DriverLocation>>>,
}

impl DriverLocator {
    pub fn new(provisioner: Arc<dyn KernelProvisioner>, net_subtree: impl Into<PathBuf>) -> Self {
        Self {
            provisioner,
            net_subtree: net_subtree.into(),
            overrides: HashMap::new(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Use `path` (relative to the tree root) for `driver` instead of searching.
    pub fn with_override(mut self, driver: &str, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(driver.to_string(), path.into());
        self
    }

    /// Locate `driver` in the tree of `version`.
    ///
    /// `Ok(None)` when the version cannot be provisioned or the driver is
    /// not in its tree.
    pub fn locate(&self, driver: &DriverKey, version: VersionId) -> ProvisionResult<Option<DriverLocation>> {
        let key = (version, driver.clone());
        if let Ok(memo) = self.memo.lock() {
            if let Some(hit) = memo.get(&key) {
                return Ok(hit.clone());
            }
        }

        let found = match self.provisioner.provision(version)? {
            Some(tree) => self.search(&tree, &driver.name),
            None => None,
        };
        tracing::debug!(driver = %driver.name, %version, found = found.is_some(), "located driver");

        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(key, found.clone());
        }
        Ok(found)
    }

    fn search(&self, tree: &Path, name: &str) -> Option<DriverLocation> {
        if let Some(path) = self.overrides.get(name) {
            let full = tree.join(path);
            return if full.is_dir() {
                Some(location(tree, path.clone(), path.clone()))
            } else if full.is_file() {
                let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
                Some(location(tree, base, path.clone()))
            } else {
                None
            };
        }

        let root = tree.join(&self.net_subtree);
        let file_name = format!("{}.c", name);
        // (is_file, depth, path): directories first, then shallowest, then by name.
        let mut best: Option<(bool, usize, PathBuf)> = None;

        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let Ok(entry) = entry else { continue };
            let entry_name = entry.file_name().to_string_lossy();
            let candidate = if entry.file_type().is_dir() && entry_name == name {
                (false, entry.depth())
            } else if entry.file_type().is_file() && entry_name == file_name {
                (true, entry.depth())
            } else {
                continue;
            };
            let Ok(rel) = entry.path().strip_prefix(tree) else { continue };
            let candidate = (candidate.0, candidate.1, rel.to_path_buf());
            if best.as_ref().map_or(true, |b| candidate < *b) {
                best = Some(candidate);
            }
        }

        best.map(|(is_file, _, target)| {
            let base = if is_file {
                target.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                target.clone()
            };
            location(tree, base, target)
        })
    }
}

fn location(tree: &Path, base: PathBuf, target: PathBuf) -> DriverLocation {
    DriverLocation {
        tree: tree.to_path_buf(),
        base,
        target,
    }
}
