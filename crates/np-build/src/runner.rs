//! Driver build runner.
//!
//! [`MakeRunner`] builds one patch against one kernel tree:
//! 1. Create a fresh scoped working directory
//! 2. Export the build-driving source at the patch's source commit
//! 3. Drop the patch into a private patch directory
//! 4. Configure a build with only the target driver enabled
//! 5. Compile with the configured parallelism and capture the output
//!
//! The working directory is removed on every path unless
//! `keep_build_dirs` is set.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use chrono::Utc;
use np_vers::{DriverKey, VersionId};
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};
use crate::verdict::BuildVerdict;

/// Everything a runner needs to build one patch for one version.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub version: VersionId,
    /// Prepared kernel tree for `version`.
    pub kernel_dir: PathBuf,
    pub driver: DriverKey,
    /// Patch identifier, used as the patch file name.
    pub patch_id: String,
    pub patch_content: Vec<u8>,
    pub source_commit: String,
    /// Compiler parallelism.
    pub jobs: usize,
}

/// Compiles a patch. Implemented by the make-based runner and by test fakes.
pub trait BuildRunner {
    /// Build; `Err` only when no verdict could be produced.
    fn build(&self, request: &BuildRequest) -> BuildResult<BuildVerdict>;
}

/// Exports the build-driving source tree at a commit.
pub trait SourceExport {
    fn export_source(&self, commit: &str, dest: &Path) -> BuildResult<()>;
}

/// A command line with `{placeholder}` substitution.
///
/// Placeholders: `{kernel_dir}`, `{driver}`, `{patch_dir}`, `{source_dir}`, `{jobs}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(pub Vec<String>);

impl CommandTemplate {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Substitute placeholders, returning program and arguments.
    pub fn expand(&self, vars: &[(&str, String)]) -> BuildResult<(String, Vec<String>)> {
        let mut expanded = self.0.iter().map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        });
        let program = expanded.next().ok_or(BuildError::EmptyTemplate)?;
        Ok((program, expanded.collect()))
    }
}

/// Configuration for [`MakeRunner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeRunnerConfig {
    /// Configure step, run in the exported source directory.
    pub configure: CommandTemplate,
    /// Compile step, run after a successful configure.
    pub make: CommandTemplate,
    /// Keep working directories after the build.
    pub keep_build_dirs: bool,
    /// Parent for working directories; the system temp dir when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_root: Option<PathBuf>,
}

impl Default for MakeRunnerConfig {
    fn default() -> Self {
        Self {
            configure: CommandTemplate::new([
                "./configure",
                "--kernel-dir={kernel_dir}",
                "--no-drivers",
                "--drivers={driver}",
                "--patches={patch_dir}",
            ]),
            make: CommandTemplate::new(["make", "-j{jobs}"]),
            keep_build_dirs: false,
            scratch_root: None,
        }
    }
}

/// Builds patches by exporting the source, configuring and running make.
pub struct MakeRunner<E> {
    config: MakeRunnerConfig,
    exporter: E,
}

impl<E: SourceExport> MakeRunner<E> {
    pub fn new(config: MakeRunnerConfig, exporter: E) -> Self {
        Self { config, exporter }
    }

    fn scratch_dir(&self, request: &BuildRequest) -> BuildResult<tempfile::TempDir> {
        let prefix = format!("np-build-{}-{}-", request.driver.name, request.version.canonical());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.config.scratch_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Run one step, appending its output to `log`. Returns success.
    fn run_step(
        &self,
        template: &CommandTemplate,
        vars: &[(&str, String)],
        cwd: &Path,
        log: &mut String,
    ) -> BuildResult<bool> {
        let (program, args) = template.expand(vars)?;
        let _ = writeln!(log, "=== {} {} ===", program, args.join(" "));

        let output = Command::new(&program)
            .args(&args)
            .current_dir(cwd)
            .output()
            .map_err(|e| BuildError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        match output.status.code() {
            Some(code) => {
                let _ = writeln!(log, "=== exit {} ===", code);
            }
            None => {
                let _ = writeln!(log, "=== terminated by signal ===");
            }
        }
        Ok(output.status.success())
    }
}

impl<E: SourceExport> BuildRunner for MakeRunner<E> {
    fn build(&self, request: &BuildRequest) -> BuildResult<BuildVerdict> {
        let start = Instant::now();
        let scratch = self.scratch_dir(request)?;
        let source_dir = scratch.path().join("src");
        let patch_dir = scratch.path().join("patches");
        fs::create_dir_all(&patch_dir)?;

        self.exporter.export_source(&request.source_commit, &source_dir)?;
        fs::write(patch_dir.join(&request.patch_id), &request.patch_content)?;

        let mut log = String::new();
        let _ = writeln!(log, "patch: {}", request.patch_id);
        let _ = writeln!(log, "kernel: {} ({})", request.version, request.kernel_dir.display());
        let _ = writeln!(log, "source_commit: {}", request.source_commit);
        let _ = writeln!(log, "started_at: {}", Utc::now().to_rfc3339());

        let vars = [
            ("kernel_dir", request.kernel_dir.display().to_string()),
            ("driver", request.driver.name.clone()),
            ("patch_dir", patch_dir.display().to_string()),
            ("source_dir", source_dir.display().to_string()),
            ("jobs", request.jobs.max(1).to_string()),
        ];

        let ok = self.run_step(&self.config.configure, &vars, &source_dir, &mut log)?
            && self.run_step(&self.config.make, &vars, &source_dir, &mut log)?;

        tracing::debug!(
            patch = %request.patch_id,
            version = %request.version,
            ok,
            duration_ms = start.elapsed().as_millis() as u64,
            "build finished"
        );

        if self.config.keep_build_dirs {
            let kept = scratch.into_path();
            tracing::info!(dir = %kept.display(), "keeping build directory");
        }

        Ok(if ok {
            BuildVerdict::success(log)
        } else {
            BuildVerdict::failure(log)
        })
    }
}
