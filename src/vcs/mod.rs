//! Version control access.
//!
//! [`SourceControl`] is the seam between the engine and git. [`GitRepos`]
//! talks to local repositories through `libgit2`; each call opens the
//! repository it needs, so one instance serves the kernel, reference and
//! source repositories alike.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::build::CheckoutBuilder;
use git2::{DiffFormat, DiffOptions, ErrorCode, Repository};
use np_build::{BuildError, BuildResult, SourceExport};
use thiserror::Error;

use crate::diffutil;

/// Errors from version control operations.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("revision {rev} not found in {repo}")]
    RevNotFound { repo: String, rev: String },
}

/// Result type for version control operations.
pub type VcsResult<T> = Result<T, VcsError>;

/// Repository operations the engine depends on.
pub trait SourceControl {
    /// Commit id a revision resolves to; `None` if it does not exist.
    fn resolve(&self, repo: &Path, rev: &str) -> VcsResult<Option<String>>;

    /// Unified diff `from..to` restricted to `target`, with paths made
    /// relative to `base`. Raw bytes: sources need not be UTF-8.
    fn diff(&self, repo: &Path, from: &str, to: &str, target: &Path, base: &Path) -> VcsResult<Vec<u8>>;

    /// Write the tree of `rev` into `dest`.
    fn export(&self, repo: &Path, rev: &str, dest: &Path) -> VcsResult<()>;
}

/// [`SourceControl`] over local git repositories.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRepos;

impl GitRepos {
    pub fn new() -> Self {
        Self
    }

    fn open(repo: &Path) -> VcsResult<Repository> {
        Ok(Repository::open(repo)?)
    }

    fn tree<'r>(repo: &'r Repository, path: &Path, rev: &str) -> VcsResult<git2::Tree<'r>> {
        let object = repo.revparse_single(rev).map_err(|e| match e.code() {
            ErrorCode::NotFound => VcsError::RevNotFound {
                repo: path.display().to_string(),
                rev: rev.to_string(),
            },
            _ => VcsError::Git(e),
        })?;
        Ok(object.peel_to_tree()?)
    }
}

impl SourceControl for GitRepos {
    fn resolve(&self, repo: &Path, rev: &str) -> VcsResult<Option<String>> {
        let repository = Self::open(repo)?;
        let object = match repository.revparse_single(rev) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let commit = object.peel_to_commit()?;
        let id = commit.id().to_string();
        Ok(Some(id))
    }

    fn diff(&self, repo: &Path, from: &str, to: &str, target: &Path, base: &Path) -> VcsResult<Vec<u8>> {
        let repository = Self::open(repo)?;
        let old_tree = Self::tree(&repository, repo, from)?;
        let new_tree = Self::tree(&repository, repo, to)?;

        let mut options = DiffOptions::new();
        options.pathspec(target).disable_pathspec_match(true);
        let diff = repository.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut options))?;

        let mut bytes = Vec::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                bytes.push(line.origin() as u8);
            }
            bytes.extend_from_slice(line.content());
            true
        })?;

        Ok(diffutil::relativize(&bytes, base))
    }

    fn export(&self, repo: &Path, rev: &str, dest: &Path) -> VcsResult<()> {
        let repository = Self::open(repo)?;
        let tree = Self::tree(&repository, repo, rev)?;
        fs::create_dir_all(dest)?;

        let mut checkout = CheckoutBuilder::new();
        checkout
            .target_dir(dest)
            .update_index(false)
            .recreate_missing(true)
            .force();
        repository.checkout_tree(tree.as_object(), Some(&mut checkout))?;
        Ok(())
    }
}

/// Exports the build-driving source tree from one repository.
#[derive(Clone)]
pub struct RepoExport {
    vcs: Arc<dyn SourceControl>,
    repo: PathBuf,
}

impl RepoExport {
    pub fn new(vcs: Arc<dyn SourceControl>, repo: impl Into<PathBuf>) -> Self {
        Self { vcs, repo: repo.into() }
    }
}

impl SourceExport for RepoExport {
    fn export_source(&self, commit: &str, dest: &Path) -> BuildResult<()> {
        self.vcs
            .export(&self.repo, commit, dest)
            .map_err(|e| BuildError::Export {
                commit: commit.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};
    use tempfile::TempDir;

    /// Commit the given files on top of HEAD and return the commit id.
    fn commit(repo: &Repository, files: &[(&str, &[u8])], message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let mut index = repo.index().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::new("np", "np@example.com", &Time::new(0, 0)).unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    /// A repository with tag `v3.8` and branch `netmap-3.8` adding a line to e1000e.
    fn kernel_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let base = commit(
            &repo,
            &[
                ("drivers/net/e1000e/netdev.c", b"int a;\nint b;\n"),
                ("drivers/net/igb/igb_main.c", b"int c;\n"),
            ],
            "v3.8",
        );
        repo.tag_lightweight("v3.8", &repo.find_object(base, None).unwrap(), false)
            .unwrap();
        let patched = commit(
            &repo,
            &[
                ("drivers/net/e1000e/netdev.c", b"int a;\nint netmap;\nint b;\n"),
                ("drivers/net/igb/igb_main.c", b"int c;\nint d;\n"),
            ],
            "netmap",
        );
        repo.branch("netmap-3.8", &repo.find_commit(patched).unwrap(), false)
            .unwrap();
        (dir, repo)
    }

    #[test]
    fn test_resolve() {
        let (dir, _repo) = kernel_repo();
        let git = GitRepos::new();
        assert_eq!(git.resolve(dir.path(), "netmap-3.8").unwrap().unwrap().len(), 40);
        assert!(git.resolve(dir.path(), "v3.8").unwrap().is_some());
        assert!(git.resolve(dir.path(), "v9.9").unwrap().is_none());
    }

    #[test]
    fn test_diff_scoped_and_relative() {
        let (dir, _repo) = kernel_repo();
        let diff = GitRepos::new()
            .diff(
                dir.path(),
                "v3.8",
                "netmap-3.8",
                Path::new("drivers/net/e1000e"),
                Path::new("drivers/net/e1000e"),
            )
            .unwrap();
        let diff = String::from_utf8(diff).unwrap();
        assert!(diff.contains("--- a/netdev.c\n"));
        assert!(diff.contains("+++ b/netdev.c\n"));
        assert!(diff.contains("+int netmap;\n"));
        assert!(!diff.contains("igb"));
    }

    #[test]
    fn test_diff_keeps_non_utf8_bytes() {
        let (dir, repo) = kernel_repo();
        repo.tag_lightweight("v3.9", &repo.head().unwrap().peel_to_commit().unwrap().into_object(), false)
            .unwrap();
        let latin1 = commit(
            &repo,
            &[("drivers/net/e1000e/netdev.c", b"/* Fran\xe7ois */\nint a;\nint netmap;\nint b;\n")],
            "netmap",
        );
        repo.branch("netmap-3.9", &repo.find_commit(latin1).unwrap(), false)
            .unwrap();

        let diff = GitRepos::new()
            .diff(
                dir.path(),
                "v3.9",
                "netmap-3.9",
                Path::new("drivers/net/e1000e"),
                Path::new("drivers/net/e1000e"),
            )
            .unwrap();
        assert!(diff.starts_with(b"diff --git a/netdev.c b/netdev.c\n"));
        assert!(diff.ends_with(b"+/* Fran\xe7ois */\n int a;\n int netmap;\n int b;\n"));
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let (dir, _repo) = kernel_repo();
        let diff = GitRepos::new()
            .diff(dir.path(), "v3.8", "v3.8", Path::new("drivers/net/e1000e"), Path::new("drivers/net/e1000e"))
            .unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_export() {
        let (dir, _repo) = kernel_repo();
        let out = TempDir::new().unwrap();
        let dest = out.path().join("linux-30800");
        GitRepos::new().export(dir.path(), "v3.8", &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("drivers/net/e1000e/netdev.c")).unwrap(),
            "int a;\nint b;\n"
        );
    }

    #[test]
    fn test_missing_rev_is_error_for_diff() {
        let (dir, _repo) = kernel_repo();
        let err = GitRepos::new()
            .diff(dir.path(), "v9.9", "netmap-3.8", Path::new("x"), Path::new("x"))
            .unwrap_err();
        assert!(matches!(err, VcsError::RevNotFound { .. }));
    }
}
