//! Single-version patch extraction.
//!
//! The patch for version `v` is the diff the reference branch for `v`
//! introduces on top of the upstream tag for `v`, restricted to the driver
//! and made relative to its base directory. It claims `[v, v.next())`.

use std::path::PathBuf;
use std::sync::Arc;

use np_vers::{DriverKey, PatchRange, VersionId};

use crate::locate::DriverLocator;
use crate::patch::Patch;
use crate::pipeline::PipelineResult;
use crate::store::{Collection, PatchStore};
use crate::vcs::SourceControl;

/// Whether an already stored single-version patch may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Always diff the repositories.
    Fresh,
    /// Return the `pending` patch for the version if there is one.
    PreferCached,
}

/// Reference repository naming.
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub reference_repo: PathBuf,
    /// Upstream tag for a version; `{version}` is replaced.
    pub tag_format: String,
    /// Reference branch for a version; `{version}` is replaced.
    pub branch_format: String,
}

pub struct Extractor {
    vcs: Arc<dyn SourceControl>,
    locator: Arc<DriverLocator>,
    store: Arc<dyn PatchStore>,
    settings: ExtractSettings,
    /// Reference-source commit stamped on every extracted patch.
    source_commit: String,
}

impl Extractor {
    pub fn new(
        vcs: Arc<dyn SourceControl>,
        locator: Arc<DriverLocator>,
        store: Arc<dyn PatchStore>,
        settings: ExtractSettings,
        source_commit: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            locator,
            store,
            settings,
            source_commit: source_commit.into(),
        }
    }

    pub fn source_commit(&self) -> &str {
        &self.source_commit
    }

    /// Extract the patch for `driver` at `version`; `None` when there is
    /// nothing to patch.
    pub fn extract(&self, driver: &DriverKey, version: VersionId, mode: ExtractMode) -> PipelineResult<Option<Patch>> {
        let range = PatchRange::single(driver.clone(), version)?;

        if mode == ExtractMode::PreferCached {
            if let Some(patch) = self.store.get(Collection::Pending, &range.compose())? {
                tracing::debug!(patch = %range, "reusing pending patch");
                return Ok(Some(patch));
            }
        }

        let Some(location) = self.locator.locate(driver, version)? else {
            tracing::debug!(driver = %driver.name, %version, "driver not present");
            return Ok(None);
        };

        let repo = &self.settings.reference_repo;
        let tag = self.settings.tag_format.replace("{version}", &version.to_string());
        let branch = self.settings.branch_format.replace("{version}", &version.to_string());
        if self.vcs.resolve(repo, &tag)?.is_none() {
            tracing::info!(%version, %tag, "upstream tag missing");
            return Ok(None);
        }
        if self.vcs.resolve(repo, &branch)?.is_none() {
            tracing::info!(%version, %branch, "reference branch missing");
            return Ok(None);
        }

        let diff = self
            .vcs
            .diff(repo, &tag, &branch, &location.target, &location.base)?;
        if diff.iter().all(u8::is_ascii_whitespace) {
            tracing::debug!(driver = %driver.name, %version, "empty diff");
            return Ok(None);
        }

        tracing::debug!(patch = %range, bytes = diff.len(), "extracted patch");
        Ok(Some(Patch::new(range, diff, self.source_commit.clone())))
    }
}
