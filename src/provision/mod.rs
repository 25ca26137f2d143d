//! Kernel tree provisioning.
//!
//! A provisioned tree is the upstream kernel source at the release tag of a
//! version, exported once into `<trees>/linux-<canonical>` and prepared by
//! the configured commands. A marker file records completion; until it is
//! written the tree lives under a `.partial` name and is rebuilt from
//! scratch on the next request.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use np_build::{BuildError, CommandTemplate};
use np_vers::VersionId;
use thiserror::Error;

use crate::vcs::{SourceControl, VcsError};

/// Marker written into a tree once it is ready.
pub const READY_MARKER: &str = ".np-ready";

/// Errors from tree provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid prepare command: {0}")]
    Command(#[from] BuildError),

    #[error("prepare step `{command}` failed for {version}: {reason}")]
    Prepare {
        version: VersionId,
        command: String,
        reason: String,
    },
}

/// Result type for provisioning.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Supplies ready-to-build kernel trees.
pub trait KernelProvisioner {
    /// Root of the tree for `version`; `None` if the version cannot be
    /// provisioned (no such release). Repeated calls return the same tree.
    fn provision(&self, version: VersionId) -> ProvisionResult<Option<PathBuf>>;
}

/// Settings for [`TreeProvisioner`].
#[derive(Debug, Clone)]
pub struct TreeSettings {
    /// Upstream kernel repository.
    pub repo: PathBuf,
    /// Directory holding provisioned trees.
    pub trees: PathBuf,
    /// Tag name for a version; `{version}` is replaced.
    pub tag_format: String,
    /// Commands run once in each new tree.
    pub prepare: Vec<CommandTemplate>,
    pub jobs: usize,
}

/// Exports release tags from a kernel repository.
pub struct TreeProvisioner {
    vcs: Arc<dyn SourceControl>,
    settings: TreeSettings,
}

impl TreeProvisioner {
    pub fn new(vcs: Arc<dyn SourceControl>, settings: TreeSettings) -> Self {
        Self { vcs, settings }
    }

    pub fn tree_dir(&self, version: VersionId) -> PathBuf {
        self.settings.trees.join(format!("linux-{}", version.canonical()))
    }

    pub fn tag(&self, version: VersionId) -> String {
        self.settings.tag_format.replace("{version}", &version.to_string())
    }

    fn prepare(&self, version: VersionId, dir: &Path) -> ProvisionResult<()> {
        let vars = [
            ("kernel_dir", dir.display().to_string()),
            ("version", version.to_string()),
            ("jobs", self.settings.jobs.max(1).to_string()),
        ];
        for template in &self.settings.prepare {
            let (program, args) = template.expand(&vars)?;
            let command = format!("{} {}", program, args.join(" "));
            tracing::debug!(%version, %command, "preparing kernel tree");

            let output = Command::new(&program)
                .args(&args)
                .current_dir(dir)
                .output()
                .map_err(|e| ProvisionError::Prepare {
                    version,
                    command: command.clone(),
                    reason: e.to_string(),
                })?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ProvisionError::Prepare {
                    version,
                    command,
                    reason: stderr.trim().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl KernelProvisioner for TreeProvisioner {
    fn provision(&self, version: VersionId) -> ProvisionResult<Option<PathBuf>> {
        if version.is_infinity() {
            return Ok(None);
        }
        let dir = self.tree_dir(version);
        if dir.join(READY_MARKER).exists() {
            return Ok(Some(dir));
        }

        let tag = self.tag(version);
        if self.vcs.resolve(&self.settings.repo, &tag)?.is_none() {
            tracing::debug!(%version, %tag, "no upstream tag, version cannot be provisioned");
            return Ok(None);
        }

        tracing::info!(%version, dir = %dir.display(), "provisioning kernel tree");
        let partial = self
            .settings
            .trees
            .join(format!(".linux-{}.partial", version.canonical()));
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        self.vcs.export(&self.settings.repo, &tag, &partial)?;
        self.prepare(version, &partial)?;
        fs::write(partial.join(READY_MARKER), &tag)?;

        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::rename(&partial, &dir)?;
        Ok(Some(dir))
    }
}
