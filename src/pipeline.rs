//! Orchestration of the patch workflow.
//!
//! For one driver over `[from, to)`:
//! 1. Extract a single-version patch per version into `pending`
//! 2. Verify each pending patch; failures move to `rejected`
//! 3. Minimize `pending` into `final`
//! 4. Open the last final patch up to infinity if it ends at `to`
//! 5. Verify the final patches; failures move to `rejected`
//!
//! Collaborators are injected through [`Collaborators`], so the same
//! pipeline runs against git and make or against the in-memory mocks.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use np_build::{
    BuildError, BuildRunner, CacheError, CacheStats, DirVerdictCache, MakeRunner, VerdictCache,
};
use np_vers::{DriverKey, PatchIdError, VersError, VersionId};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::extend::ExtensionTester;
use crate::extract::{ExtractMode, ExtractSettings, Extractor};
use crate::infinity;
use crate::locate::{DriverLocation, DriverLocator};
use crate::minimize::Minimizer;
use crate::patch::Patch;
use crate::provision::{KernelProvisioner, ProvisionError, TreeProvisioner, TreeSettings};
use crate::store::{Collection, DirStore, PatchStore, StoreError};
use crate::telemetry;
use crate::vcs::{GitRepos, RepoExport, SourceControl, VcsError};
use crate::verify::{BuildVerifier, VerifyOutcome, VerifyReport};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid version: {0}")]
    Version(#[from] VersError),

    #[error("invalid patch id: {0}")]
    PatchId(#[from] PatchIdError),

    #[error("invalid driver pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("invalid range [{from}, {to})")]
    InvalidRange { from: VersionId, to: VersionId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("{0} patch(es) failed verification")]
    VerificationFailed(usize),

    #[error("{0} driver(s) could not be processed")]
    DriversFailed(usize),
}

impl PipelineError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_)
            | PipelineError::Version(_)
            | PipelineError::PatchId(_)
            | PipelineError::Pattern(_)
            | PipelineError::InvalidRange { .. } => 1,
            PipelineError::Store(_)
            | PipelineError::Cache(_)
            | PipelineError::Io(_)
            | PipelineError::Serialization(_) => 2,
            PipelineError::Vcs(_) => 3,
            PipelineError::Provision(_) => 4,
            PipelineError::Build(_) => 5,
            PipelineError::VerificationFailed(_) => 50,
            PipelineError::DriversFailed(_) => 51,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// External systems the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub vcs: Arc<dyn SourceControl>,
    pub provisioner: Arc<dyn KernelProvisioner>,
    pub runner: Arc<dyn BuildRunner>,
    pub store: Arc<dyn PatchStore>,
    pub cache: Arc<dyn VerdictCache>,
}

impl Collaborators {
    /// git repositories, exported kernel trees, make, and the work directory.
    pub fn production(settings: &Settings) -> Self {
        let vcs: Arc<dyn SourceControl> = Arc::new(GitRepos::new());
        let provisioner = TreeProvisioner::new(
            vcs.clone(),
            TreeSettings {
                repo: settings.kernel.repo.clone(),
                trees: settings.trees_dir(),
                tag_format: settings.kernel.tag_format.clone(),
                prepare: settings.kernel.prepare.clone(),
                jobs: settings.build.jobs,
            },
        );
        // Kept build directories go where they can be found again.
        let scratch = settings
            .build
            .keep_build_dirs
            .then(|| settings.workdir.join("builds"));
        let runner = MakeRunner::new(
            settings.runner_config(scratch.as_deref()),
            RepoExport::new(vcs.clone(), settings.source.repo.clone()),
        );
        Self {
            vcs,
            provisioner: Arc::new(provisioner),
            runner: Arc::new(runner),
            store: Arc::new(DirStore::new(settings.workdir.clone())),
            cache: Arc::new(DirVerdictCache::new(settings.cache_dir())),
        }
    }
}

/// Selects drivers by a glob over their names.
#[derive(Debug, Clone)]
pub struct DriverFilter {
    matcher: Option<GlobMatcher>,
}

impl DriverFilter {
    /// `None` matches every driver.
    pub fn new(pattern: Option<&str>) -> PipelineResult<Self> {
        let matcher = match pattern {
            Some(p) => Some(Glob::new(p)?.compile_matcher()),
            None => None,
        };
        Ok(Self { matcher })
    }

    pub fn matches(&self, driver: &DriverKey) -> bool {
        self.matcher.as_ref().map_or(true, |m| m.is_match(&driver.name))
    }
}

/// Outcome of the workflow for one driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverSummary {
    pub driver: String,
    /// Single-version patches extracted.
    pub extracted: usize,
    /// Versions with nothing to patch.
    pub no_patch: usize,
    pub rejected: Vec<String>,
    pub final_patches: Vec<String>,
    /// Patches that passed with compiler warnings.
    pub warned: Vec<String>,
    /// Identifier of the patch opened up to infinity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infinity: Option<String>,
    /// Why the workflow stopped early for this driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Patch counts and verification cache state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Listing {
    pub collections: BTreeMap<Collection, Vec<String>>,
    pub cache: CacheStats,
}

/// Extraction result for a version range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub extracted: Vec<String>,
    pub no_patch: Vec<VersionId>,
}

pub struct Pipeline {
    settings: Settings,
    parts: Collaborators,
    locator: Arc<DriverLocator>,
    source_commit: OnceCell<String>,
}

impl Pipeline {
    pub fn new(settings: Settings, parts: Collaborators) -> Self {
        let mut locator = DriverLocator::new(parts.provisioner.clone(), settings.kernel.net_subtree.clone());
        for spec in &settings.drivers {
            if let Some(path) = &spec.path {
                locator = locator.with_override(&spec.name, path.clone());
            }
        }
        Self {
            settings,
            parts,
            locator: Arc::new(locator),
            source_commit: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &dyn PatchStore {
        self.parts.store.as_ref()
    }

    /// Commit of the build-driving source, resolved once.
    pub fn source_commit(&self) -> PipelineResult<String> {
        if let Some(commit) = self.source_commit.get() {
            return Ok(commit.clone());
        }
        let source = &self.settings.source;
        let commit = self
            .parts
            .vcs
            .resolve(&source.repo, &source.rev)?
            .ok_or_else(|| VcsError::RevNotFound {
                repo: source.repo.display().to_string(),
                rev: source.rev.clone(),
            })?;
        tracing::debug!(rev = %source.rev, %commit, "resolved source commit");
        let _ = self.source_commit.set(commit.clone());
        Ok(commit)
    }

    fn extractor(&self) -> PipelineResult<Arc<Extractor>> {
        Ok(Arc::new(Extractor::new(
            self.parts.vcs.clone(),
            self.locator.clone(),
            self.parts.store.clone(),
            ExtractSettings {
                reference_repo: self.settings.reference.repo.clone(),
                tag_format: self.settings.kernel.tag_format.clone(),
                branch_format: self.settings.reference.branch_format.clone(),
            },
            self.source_commit()?,
        )))
    }

    fn verifier(&self) -> BuildVerifier {
        BuildVerifier::new(
            self.parts.provisioner.clone(),
            self.parts.runner.clone(),
            self.parts.cache.clone(),
            self.settings.build.jobs,
        )
    }

    pub fn driver_key(&self, name: &str) -> PipelineResult<DriverKey> {
        Ok(self.settings.driver_key(name)?)
    }

    /// Where `driver` lives in the tree of `version`.
    pub fn locate(&self, driver: &DriverKey, version: VersionId) -> PipelineResult<Option<DriverLocation>> {
        Ok(self.locator.locate(driver, version)?)
    }

    /// Extract single-version patches for `[from, to)` into `pending`.
    pub fn extract(&self, driver: &DriverKey, from: VersionId, to: VersionId) -> PipelineResult<Extraction> {
        if from >= to || to.is_infinity() {
            return Err(PipelineError::InvalidRange { from, to });
        }
        let extractor = self.extractor()?;
        let mut result = Extraction::default();

        for version in from.iter_to(to) {
            match extractor.extract(driver, version, ExtractMode::Fresh)? {
                Some(patch) => {
                    self.parts.store.put(Collection::Pending, &patch)?;
                    result.extracted.push(patch.id());
                }
                None => result.no_patch.push(version),
            }
        }
        tracing::info!(
            driver = %driver.name,
            %from,
            %to,
            extracted = result.extracted.len(),
            no_patch = result.no_patch.len(),
            "extraction finished"
        );
        Ok(result)
    }

    /// Verify every patch of `driver` in `collection`, rejecting failures.
    pub fn verify(&self, driver: &DriverKey, collection: Collection) -> PipelineResult<Vec<VerifyReport>> {
        let verifier = self.verifier();
        let mut reports = Vec::new();
        for patch in self.parts.store.list(collection, Some(driver))? {
            let report = verifier.verify(&patch);
            if report.outcome.is_failure() && collection != Collection::Rejected {
                self.parts
                    .store
                    .move_to(collection, Collection::Rejected, &report.patch_id)?;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Minimize `driver`'s pending patches into `final`.
    pub fn minimize(&self, driver: &DriverKey) -> PipelineResult<Vec<Patch>> {
        let extractor = self.extractor()?;
        let tester = Arc::new(ExtensionTester::new(self.locator.clone(), extractor));
        Minimizer::new(self.parts.store.clone(), tester).minimize(driver)
    }

    pub fn extend_to_infinity(&self, driver: &DriverKey, version: VersionId) -> PipelineResult<Option<String>> {
        infinity::extend_to_infinity(self.parts.store.as_ref(), driver, version)
    }

    /// The whole workflow for one driver.
    pub fn run_driver(&self, driver: &DriverKey, from: VersionId, to: VersionId) -> PipelineResult<DriverSummary> {
        let _span = telemetry::driver_span(driver).entered();
        tracing::info!(%from, %to, "processing driver");
        let mut summary = DriverSummary {
            driver: driver.field(),
            ..DriverSummary::default()
        };

        let extraction = self.extract(driver, from, to)?;
        summary.extracted = extraction.extracted.len();
        summary.no_patch = extraction.no_patch.len();

        let pending = self.verify(driver, Collection::Pending)?;
        self.minimize(driver)?;
        summary.infinity = self.extend_to_infinity(driver, to)?;
        let finals = self.verify(driver, Collection::Final)?;

        for report in pending.iter().chain(&finals) {
            match &report.outcome {
                VerifyOutcome::Failed { .. } => summary.rejected.push(report.patch_id.clone()),
                VerifyOutcome::Warned => summary.warned.push(report.patch_id.clone()),
                VerifyOutcome::Passed => {}
            }
        }
        summary.final_patches = self
            .parts
            .store
            .list(Collection::Final, Some(driver))?
            .iter()
            .map(Patch::id)
            .collect();

        tracing::info!(
            driver = %driver,
            extracted = summary.extracted,
            rejected = summary.rejected.len(),
            final_patches = summary.final_patches.len(),
            "driver finished"
        );
        Ok(summary)
    }

    /// The workflow for every configured driver matching `filter`.
    ///
    /// A driver whose workflow errors gets a summary carrying the error and
    /// the batch moves on to the next driver.
    pub fn run_all(&self, from: VersionId, to: VersionId, filter: &DriverFilter) -> PipelineResult<Vec<DriverSummary>> {
        if from >= to || to.is_infinity() {
            return Err(PipelineError::InvalidRange { from, to });
        }
        let mut summaries = Vec::new();
        for spec in &self.settings.drivers {
            let driver = spec.key()?;
            if !filter.matches(&driver) {
                continue;
            }
            let summary = self.run_driver(&driver, from, to).unwrap_or_else(|e| {
                tracing::warn!(driver = %driver, error = %e, "driver failed, continuing with the next one");
                DriverSummary {
                    driver: driver.field(),
                    error: Some(e.to_string()),
                    ..DriverSummary::default()
                }
            });
            summaries.push(summary);
        }
        if summaries.is_empty() {
            tracing::warn!("no configured driver matched");
        }
        Ok(summaries)
    }

    /// Patch identifiers per collection plus cache statistics.
    pub fn list(&self, filter: &DriverFilter) -> PipelineResult<Listing> {
        let mut listing = Listing::default();
        for collection in Collection::ALL {
            let ids = self
                .parts
                .store
                .list(collection, None)?
                .into_iter()
                .filter(|p| filter.matches(&p.range.driver))
                .map(|p| p.id())
                .collect();
            listing.collections.insert(collection, ids);
        }
        listing.cache = self.parts.cache.stats(None)?;
        Ok(listing)
    }

    /// Copy final patches into `dest`. Returns the number written.
    pub fn save(&self, dest: &Path, filter: &DriverFilter) -> PipelineResult<usize> {
        fs::create_dir_all(dest)?;
        let mut written = 0;
        for patch in self.parts.store.list(Collection::Final, None)? {
            if !filter.matches(&patch.range.driver) {
                continue;
            }
            fs::write(dest.join(patch.id()), &patch.content)?;
            written += 1;
        }
        tracing::info!(dest = %dest.display(), written, "saved final patches");
        Ok(written)
    }

    /// Drop cached verdicts, for one driver or all.
    pub fn clean_cache(&self, driver: Option<&str>) -> PipelineResult<usize> {
        let removed = self.parts.cache.clear(driver)?;
        tracing::info!(removed, "cleaned verification cache");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(PipelineError::Config(ConfigError::ParseError("x".into())).exit_code(), 1);
        assert_eq!(PipelineError::Io(io::Error::new(io::ErrorKind::Other, "x")).exit_code(), 2);
        assert_eq!(
            PipelineError::Vcs(VcsError::RevNotFound {
                repo: "linux".into(),
                rev: "v3.8".into()
            })
            .exit_code(),
            3
        );
        assert_eq!(PipelineError::Build(BuildError::EmptyTemplate).exit_code(), 5);
        assert_eq!(PipelineError::VerificationFailed(2).exit_code(), 50);
        assert_eq!(PipelineError::DriversFailed(1).exit_code(), 51);
    }

    #[test]
    fn test_driver_filter() {
        let all = DriverFilter::new(None).unwrap();
        let intel = DriverFilter::new(Some("e1000*")).unwrap();
        let e1000e = DriverKey::vanilla("e1000e").unwrap();
        let igb = DriverKey::vanilla("igb").unwrap();

        assert!(all.matches(&igb));
        assert!(intel.matches(&e1000e));
        assert!(!intel.matches(&igb));
        assert!(DriverFilter::new(Some("[")).is_err());
    }
}
