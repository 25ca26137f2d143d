use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::lock;
use crate::diffutil::copy_tree;
use crate::vcs::{SourceControl, VcsError, VcsResult};

#[derive(Debug, Default)]
struct VcsState {
    refs: HashMap<String, String>,
    trees: HashMap<String, PathBuf>,
    diffs: HashMap<(String, String), Vec<u8>>,
    target_diffs: HashMap<(String, String, PathBuf), Vec<u8>>,
    broken_targets: HashSet<PathBuf>,
    diff_calls: usize,
    export_calls: usize,
}

/// Fake repositories. The repository path argument is ignored.
#[derive(Debug, Clone, Default)]
pub struct MockVcs {
    state: Arc<Mutex<VcsState>>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `rev` resolve to `commit`.
    pub fn add_ref(&self, rev: &str, commit: &str) {
        lock(&self.state).refs.insert(rev.to_string(), commit.to_string());
    }

    /// Make `rev` exportable as a copy of `dir`.
    pub fn add_tree(&self, rev: &str, dir: &Path) {
        lock(&self.state).trees.insert(rev.to_string(), dir.to_path_buf());
    }

    /// Diff returned for `from..to`, already relative to the driver base.
    pub fn set_diff(&self, from: &str, to: &str, diff: impl AsRef<[u8]>) {
        let mut state = lock(&self.state);
        Self::ensure_refs(&mut state, from, to);
        state
            .diffs
            .insert((from.to_string(), to.to_string()), diff.as_ref().to_vec());
    }

    /// Diff returned for `from..to` when restricted to `target`; takes
    /// precedence over [`MockVcs::set_diff`].
    pub fn set_target_diff(&self, from: &str, to: &str, target: &Path, diff: impl AsRef<[u8]>) {
        let mut state = lock(&self.state);
        Self::ensure_refs(&mut state, from, to);
        state.target_diffs.insert(
            (from.to_string(), to.to_string(), target.to_path_buf()),
            diff.as_ref().to_vec(),
        );
    }

    /// Make every diff restricted to `target` fail with a git error.
    pub fn break_target(&self, target: &Path) {
        lock(&self.state).broken_targets.insert(target.to_path_buf());
    }

    fn ensure_refs(state: &mut VcsState, from: &str, to: &str) {
        for rev in [from, to] {
            if !state.refs.contains_key(rev) {
                let commit = format!("commit-{}", rev);
                state.refs.insert(rev.to_string(), commit);
            }
        }
    }

    pub fn diff_count(&self) -> usize {
        lock(&self.state).diff_calls
    }

    pub fn export_count(&self) -> usize {
        lock(&self.state).export_calls
    }

    fn lookup(state: &VcsState, rev: &str) -> Option<String> {
        state
            .refs
            .get(rev)
            .cloned()
            .or_else(|| state.trees.contains_key(rev).then(|| format!("commit-{}", rev)))
    }
}

fn not_found(repo: &Path, rev: &str) -> VcsError {
    VcsError::RevNotFound {
        repo: repo.display().to_string(),
        rev: rev.to_string(),
    }
}

impl SourceControl for MockVcs {
    fn resolve(&self, _repo: &Path, rev: &str) -> VcsResult<Option<String>> {
        Ok(Self::lookup(&lock(&self.state), rev))
    }

    fn diff(&self, repo: &Path, from: &str, to: &str, target: &Path, _base: &Path) -> VcsResult<Vec<u8>> {
        let mut state = lock(&self.state);
        state.diff_calls += 1;
        for rev in [from, to] {
            if Self::lookup(&state, rev).is_none() {
                return Err(not_found(repo, rev));
            }
        }
        if state.broken_targets.contains(target) {
            return Err(VcsError::Git(git2::Error::from_str(&format!(
                "mock diff failure for {}",
                target.display()
            ))));
        }
        let revs = (from.to_string(), to.to_string());
        let specific = (revs.0.clone(), revs.1.clone(), target.to_path_buf());
        Ok(state
            .target_diffs
            .get(&specific)
            .or_else(|| state.diffs.get(&revs))
            .cloned()
            .unwrap_or_default())
    }

    fn export(&self, repo: &Path, rev: &str, dest: &Path) -> VcsResult<()> {
        let source = {
            let mut state = lock(&self.state);
            state.export_calls += 1;
            state.trees.get(rev).cloned()
        };
        let source = source.ok_or_else(|| not_found(repo, rev))?;
        copy_tree(&source, dest)?;
        Ok(())
    }
}
