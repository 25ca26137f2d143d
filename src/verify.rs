//! Build verification of a patch over its whole range.
//!
//! Every version in `[start, end)` is built in turn, reusing cached verdicts
//! whose patch hash and source commit match. The first failing version
//! stops the walk. Versions that cannot be provisioned end the walk
//! successfully when the range is open-ended and fail it otherwise.

use std::fmt;
use std::sync::Arc;

use np_build::{BuildRequest, BuildRunner, BuildVerdict, CacheEntry, CacheKey, VerdictCache};
use np_vers::VersionId;
use serde::Serialize;

use crate::patch::Patch;
use crate::provision::KernelProvisioner;

/// Why a patch failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The patch did not apply or the driver did not compile.
    BuildFailed,
    /// No kernel tree exists for a version inside a finite range.
    Unprovisionable,
    /// Provisioning the kernel tree errored.
    Provision(String),
    /// The build could not be run at all.
    Infrastructure(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildFailed => f.write_str("build failed"),
            Self::Unprovisionable => f.write_str("kernel tree unavailable"),
            Self::Provision(e) => write!(f, "provisioning error: {}", e),
            Self::Infrastructure(e) => write!(f, "build error: {}", e),
        }
    }
}

/// Overall result for one patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Passed,
    /// Passed, with compiler warnings for at least one version.
    Warned,
    Failed { version: VersionId, reason: FailureReason },
}

impl VerifyOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Verdict for one version of the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionCheck {
    pub version: VersionId,
    pub ok: bool,
    pub warned: bool,
    /// Answered from the cache without building.
    pub cached: bool,
}

impl VersionCheck {
    fn new(version: VersionId, verdict: &BuildVerdict, cached: bool) -> Self {
        Self {
            version,
            ok: verdict.ok,
            warned: verdict.warned,
            cached,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub patch_id: String,
    pub outcome: VerifyOutcome,
    pub versions: Vec<VersionCheck>,
}

impl VerifyReport {
    pub fn builds(&self) -> usize {
        self.versions.iter().filter(|v| !v.cached).count()
    }
}

pub struct BuildVerifier {
    provisioner: Arc<dyn KernelProvisioner>,
    runner: Arc<dyn BuildRunner>,
    cache: Arc<dyn VerdictCache>,
    jobs: usize,
}

impl BuildVerifier {
    pub fn new(
        provisioner: Arc<dyn KernelProvisioner>,
        runner: Arc<dyn BuildRunner>,
        cache: Arc<dyn VerdictCache>,
        jobs: usize,
    ) -> Self {
        Self {
            provisioner,
            runner,
            cache,
            jobs,
        }
    }

    /// Build `patch` for every version of its range.
    pub fn verify(&self, patch: &Patch) -> VerifyReport {
        let patch_id = patch.id();
        let driver = &patch.range.driver;
        let mut versions = Vec::new();
        let mut warned = false;

        for version in patch.range.start.iter_to(patch.range.end) {
            let key = CacheKey::new(version, driver.clone(), &patch.content, &patch.source_commit);

            let cached = match self.cache.get(&key) {
                Ok(hit) => hit,
                Err(e) => {
                    tracing::warn!(patch = %patch_id, %version, error = %e, "cache lookup failed, rebuilding");
                    None
                }
            };
            let (verdict, from_cache) = match cached {
                Some(entry) => {
                    tracing::debug!(patch = %patch_id, %version, status = entry.verdict.status_str(), "cache hit");
                    (entry.verdict, true)
                }
                None => match self.build(patch, &patch_id, version, &key) {
                    Step::Built(verdict) => (verdict, false),
                    Step::Unprovisionable if patch.range.end.is_infinity() => {
                        tracing::info!(patch = %patch_id, %version, "no kernel tree, open-ended tail assumed good");
                        break;
                    }
                    Step::Unprovisionable => {
                        return fail(patch_id, versions, version, FailureReason::Unprovisionable);
                    }
                    Step::Error(reason) => return fail(patch_id, versions, version, reason),
                },
            };

            versions.push(VersionCheck::new(version, &verdict, from_cache));
            if !verdict.ok {
                match self.cache.log_location(&key) {
                    Some(path) => tracing::error!(patch = %patch_id, %version, log = %path.display(), "build failed"),
                    None => tracing::error!(patch = %patch_id, %version, "build failed"),
                }
                return VerifyReport {
                    patch_id,
                    outcome: VerifyOutcome::Failed {
                        version,
                        reason: FailureReason::BuildFailed,
                    },
                    versions,
                };
            }
            if verdict.warned {
                tracing::warn!(patch = %patch_id, %version, "build produced warnings");
                warned = true;
            }
        }

        VerifyReport {
            patch_id,
            outcome: if warned {
                VerifyOutcome::Warned
            } else {
                VerifyOutcome::Passed
            },
            versions,
        }
    }

    fn build(&self, patch: &Patch, patch_id: &str, version: VersionId, key: &CacheKey) -> Step {
        let kernel_dir = match self.provisioner.provision(version) {
            Ok(Some(dir)) => dir,
            Ok(None) => return Step::Unprovisionable,
            Err(e) => return Step::Error(FailureReason::Provision(e.to_string())),
        };

        let request = BuildRequest {
            version,
            kernel_dir,
            driver: patch.range.driver.clone(),
            patch_id: patch_id.to_string(),
            patch_content: patch.content.clone(),
            source_commit: patch.source_commit.clone(),
            jobs: self.jobs,
        };
        tracing::info!(patch = %patch_id, %version, "building");
        let verdict = match self.runner.build(&request) {
            Ok(verdict) => verdict,
            Err(e) => return Step::Error(FailureReason::Infrastructure(e.to_string())),
        };

        let entry = CacheEntry::new(key.clone(), patch_id, &patch.content, verdict.clone());
        if let Err(e) = self.cache.put(&entry) {
            tracing::warn!(patch = %patch_id, %version, error = %e, "failed to store verdict");
        }
        Step::Built(verdict)
    }
}

enum Step {
    Built(BuildVerdict),
    Unprovisionable,
    Error(FailureReason),
}

fn fail(patch_id: String, versions: Vec<VersionCheck>, version: VersionId, reason: FailureReason) -> VerifyReport {
    tracing::error!(patch = %patch_id, %version, %reason, "verification failed");
    VerifyReport {
        patch_id,
        outcome: VerifyOutcome::Failed { version, reason },
        versions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BuildScript, MockBuildRunner, MockProvisioner};
    use np_build::MemoryVerdictCache;
    use np_vers::{DriverKey, PatchRange};
    use tempfile::TempDir;

    struct Setup {
        _tree: TempDir,
        prov: MockProvisioner,
        runner: MockBuildRunner,
        cache: Arc<MemoryVerdictCache>,
        verifier: BuildVerifier,
    }

    /// Kernel trees for 3.0 ..= 3.`last`.
    fn setup(last: u32) -> Setup {
        let tree = TempDir::new().unwrap();
        let prov = MockProvisioner::new();
        for minor in 0..=last {
            prov.add_tree(VersionId::new(3, minor, 0), tree.path());
        }
        let runner = MockBuildRunner::new();
        let cache = Arc::new(MemoryVerdictCache::new());
        let verifier = BuildVerifier::new(Arc::new(prov.clone()), Arc::new(runner.clone()), cache.clone(), 4);
        Setup {
            _tree: tree,
            prov,
            runner,
            cache,
            verifier,
        }
    }

    fn patch(start: u32, end: VersionId) -> Patch {
        let range = PatchRange::new(DriverKey::vanilla("e1000e").unwrap(), VersionId::new(3, start, 0), end).unwrap();
        Patch::new(range, "diff", "c0ffee")
    }

    #[test]
    fn test_all_pass() {
        let s = setup(5);
        let report = s.verifier.verify(&patch(0, VersionId::new(3, 3, 0)));
        assert_eq!(report.outcome, VerifyOutcome::Passed);
        assert_eq!(report.versions.len(), 3);
        assert_eq!(s.runner.build_count(), 3);
        assert_eq!(s.cache.len(), 3);
    }

    #[test]
    fn test_cache_hit_skips_build() {
        let s = setup(5);
        let p = patch(0, VersionId::new(3, 3, 0));
        s.verifier.verify(&p);
        let report = s.verifier.verify(&p);
        assert_eq!(report.outcome, VerifyOutcome::Passed);
        assert!(report.versions.iter().all(|v| v.cached));
        assert_eq!(s.runner.build_count(), 3);
    }

    #[test]
    fn test_new_commit_invalidates() {
        let s = setup(5);
        let p = patch(0, VersionId::new(3, 1, 0));
        s.verifier.verify(&p);
        let mut moved = p.clone();
        moved.source_commit = "deadbeef".to_string();
        let report = s.verifier.verify(&moved);
        assert_eq!(report.builds(), 1);
        assert_eq!(s.runner.build_count(), 2);
    }

    #[test]
    fn test_failure_stops_walk() {
        let s = setup(5);
        s.runner.script(VersionId::new(3, 2, 0), BuildScript::Fail);
        let report = s.verifier.verify(&patch(0, VersionId::new(3, 5, 0)));
        assert_eq!(
            report.outcome,
            VerifyOutcome::Failed {
                version: VersionId::new(3, 2, 0),
                reason: FailureReason::BuildFailed
            }
        );
        assert_eq!(report.versions.len(), 3);
        assert_eq!(s.runner.build_count(), 3);
    }

    #[test]
    fn test_warning_is_not_failure() {
        let s = setup(5);
        s.runner.script(VersionId::new(3, 1, 0), BuildScript::Warn);
        let report = s.verifier.verify(&patch(0, VersionId::new(3, 3, 0)));
        assert_eq!(report.outcome, VerifyOutcome::Warned);
        assert!(report.versions[1].warned);
    }

    #[test]
    fn test_failure_after_warning_is_failed() {
        let s = setup(5);
        s.runner.script(VersionId::new(3, 1, 0), BuildScript::Warn);
        s.runner.script(VersionId::new(3, 3, 0), BuildScript::Fail);
        let report = s.verifier.verify(&patch(0, VersionId::new(3, 5, 0)));
        assert_eq!(
            report.outcome,
            VerifyOutcome::Failed {
                version: VersionId::new(3, 3, 0),
                reason: FailureReason::BuildFailed
            }
        );
        assert!(report.versions[1].warned);
        assert_eq!(report.versions.len(), 4);
    }

    #[test]
    fn test_warning_survives_open_tail() {
        let s = setup(2);
        s.runner.script(VersionId::new(3, 2, 0), BuildScript::Warn);
        let report = s.verifier.verify(&patch(1, VersionId::Infinity));
        assert_eq!(report.outcome, VerifyOutcome::Warned);
        assert_eq!(report.versions.len(), 2);
        assert_eq!(s.runner.build_count(), 2);
    }

    #[test]
    fn test_warning_then_finite_gap_is_failed() {
        let s = setup(2);
        s.runner.script(VersionId::new(3, 1, 0), BuildScript::Warn);
        let report = s.verifier.verify(&patch(1, VersionId::new(3, 4, 0)));
        assert_eq!(
            report.outcome,
            VerifyOutcome::Failed {
                version: VersionId::new(3, 3, 0),
                reason: FailureReason::Unprovisionable
            }
        );
    }

    #[test]
    fn test_open_tail_forgiven() {
        let s = setup(2);
        let report = s.verifier.verify(&patch(1, VersionId::Infinity));
        assert_eq!(report.outcome, VerifyOutcome::Passed);
        assert_eq!(report.versions.len(), 2);
    }

    #[test]
    fn test_finite_gap_fails() {
        let s = setup(2);
        let report = s.verifier.verify(&patch(1, VersionId::new(3, 5, 0)));
        assert_eq!(
            report.outcome,
            VerifyOutcome::Failed {
                version: VersionId::new(3, 3, 0),
                reason: FailureReason::Unprovisionable
            }
        );
    }

    #[test]
    fn test_infrastructure_errors_fail_without_caching() {
        let s = setup(2);
        s.runner.script(VersionId::new(3, 0, 0), BuildScript::Error);
        let report = s.verifier.verify(&patch(0, VersionId::new(3, 1, 0)));
        assert!(matches!(
            report.outcome,
            VerifyOutcome::Failed {
                reason: FailureReason::Infrastructure(_),
                ..
            }
        ));
        assert!(s.cache.is_empty());

        s.prov.break_version(VersionId::new(3, 1, 0));
        let report = s.verifier.verify(&patch(1, VersionId::new(3, 2, 0)));
        assert!(matches!(
            report.outcome,
            VerifyOutcome::Failed {
                reason: FailureReason::Provision(_),
                ..
            }
        ));
    }
}
