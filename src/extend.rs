//! Range extension test.
//!
//! A patch valid over `[a, b)` extends to `b` when applying it to the
//! pristine driver sources of `b` yields the same tree as applying the
//! ground-truth patch extracted for `b`.
//!
//! Trees are compared ignoring whitespace within lines. This tolerates
//! reformatting-only kernel changes, at the price of accepting an extension
//! that differs only in whitespace inside string literals.

use std::path::Path;
use std::sync::Arc;

use np_vers::VersionId;
use tempfile::TempDir;

use crate::diffutil::{apply_to_dir, compare_trees, copy_tree, ApplyOptions};
use crate::extract::{ExtractMode, Extractor};
use crate::locate::DriverLocator;
use crate::patch::Patch;

/// Why an extension was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    NotAdjacent,
    Unavailable(String),
    ApplyFailed(String),
    TruthFailed(String),
    Diverged(Vec<String>),
}

pub struct ExtensionTester {
    locator: Arc<DriverLocator>,
    extractor: Arc<Extractor>,
}

impl ExtensionTester {
    pub fn new(locator: Arc<DriverLocator>, extractor: Arc<Extractor>) -> Self {
        Self { locator, extractor }
    }

    /// Returns true if `patch` also holds for `version`, which must be the
    /// patch's current end. Never modifies the patch.
    pub fn extend(&self, patch: &Patch, version: VersionId) -> bool {
        match self.check(patch, version) {
            Ok(()) => {
                tracing::debug!(patch = %patch.range, %version, "extension accepted");
                true
            }
            Err(refusal) => {
                tracing::warn!(patch = %patch.range, %version, ?refusal, "extension refused");
                false
            }
        }
    }

    fn check(&self, patch: &Patch, version: VersionId) -> Result<(), Refusal> {
        if patch.range.end != version || version.is_infinity() {
            return Err(Refusal::NotAdjacent);
        }
        let driver = &patch.range.driver;

        let location = match self.locator.locate(driver, version) {
            Ok(Some(location)) => location,
            Ok(None) => return Err(Refusal::Unavailable("driver not present".to_string())),
            Err(e) => return Err(Refusal::Unavailable(e.to_string())),
        };
        let pristine = location.base_dir();
        let candidate = fresh_copy(&pristine)?;
        let truth = fresh_copy(&pristine)?;

        apply_to_dir(&patch.content, candidate.path(), ApplyOptions::ignoring_whitespace())
            .map_err(|e| Refusal::ApplyFailed(e.to_string()))?;

        match self.extractor.extract(driver, version, ExtractMode::PreferCached) {
            Ok(Some(reference)) => {
                apply_to_dir(&reference.content, truth.path(), ApplyOptions::default())
                    .map_err(|e| Refusal::TruthFailed(e.to_string()))?;
            }
            // No ground-truth patch: the pristine tree is the truth.
            Ok(None) => {}
            Err(e) => return Err(Refusal::TruthFailed(e.to_string())),
        }

        let differing = compare_trees(candidate.path(), truth.path())
            .map_err(|e| Refusal::Unavailable(e.to_string()))?;
        if differing.is_empty() {
            Ok(())
        } else {
            Err(Refusal::Diverged(
                differing.iter().map(|p| p.display().to_string()).collect(),
            ))
        }
    }
}

fn fresh_copy(pristine: &Path) -> Result<TempDir, Refusal> {
    let dir = tempfile::Builder::new()
        .prefix("np-extend-")
        .tempdir()
        .map_err(|e| Refusal::Unavailable(e.to_string()))?;
    copy_tree(pristine, dir.path()).map_err(|e| Refusal::Unavailable(e.to_string()))?;
    Ok(dir)
}
