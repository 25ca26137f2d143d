use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use np_build::{BuildError, BuildRequest, BuildResult, BuildRunner, BuildVerdict};
use np_vers::VersionId;

use super::lock;

/// Scripted outcome for one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildScript {
    Pass,
    Warn,
    Fail,
    /// The runner itself errors out.
    Error,
}

#[derive(Debug, Default)]
struct BuildState {
    scripts: HashMap<VersionId, BuildScript>,
    builds: Vec<(VersionId, String)>,
}

/// Build runner returning scripted verdicts. Unscripted versions pass.
#[derive(Debug, Clone, Default)]
pub struct MockBuildRunner {
    state: Arc<Mutex<BuildState>>,
}

impl MockBuildRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, version: VersionId, script: BuildScript) {
        lock(&self.state).scripts.insert(version, script);
    }

    /// Forget all scripted outcomes.
    pub fn reset_scripts(&self) {
        lock(&self.state).scripts.clear();
    }

    /// Number of builds run so far.
    pub fn build_count(&self) -> usize {
        lock(&self.state).builds.len()
    }

    /// `(version, patch id)` of every build, in order.
    pub fn builds(&self) -> Vec<(VersionId, String)> {
        lock(&self.state).builds.clone()
    }
}

impl BuildRunner for MockBuildRunner {
    fn build(&self, request: &BuildRequest) -> BuildResult<BuildVerdict> {
        let mut state = lock(&self.state);
        state.builds.push((request.version, request.patch_id.clone()));
        let script = state
            .scripts
            .get(&request.version)
            .copied()
            .unwrap_or(BuildScript::Pass);

        let header = format!("mock build of {} for {}\n", request.patch_id, request.version);
        match script {
            BuildScript::Pass => Ok(BuildVerdict::success(header)),
            BuildScript::Warn => Ok(BuildVerdict::success(format!(
                "{}netdev.c:10:5: warning: unused variable 'na'\n",
                header
            ))),
            BuildScript::Fail => Ok(BuildVerdict::failure(format!(
                "{}netdev.c:12:1: error: expected ';'\n",
                header
            ))),
            BuildScript::Error => Err(BuildError::Spawn {
                program: "make".to_string(),
                reason: "mock runner error".to_string(),
            }),
        }
    }
}
