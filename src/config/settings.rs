//! Typed settings deserialized from the merged configuration.

use std::path::{Path, PathBuf};

use np_build::{CommandTemplate, MakeRunnerConfig};
use np_vers::{DriverKey, DriverKind, PatchIdError};
use serde::{Deserialize, Serialize};

/// Everything the pipeline needs to know, fixed for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub workdir: PathBuf,
    pub kernel: KernelSettings,
    pub reference: ReferenceSettings,
    pub source: SourceSettings,
    pub build: BuildSettings,
    #[serde(default)]
    pub drivers: Vec<DriverSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSettings {
    /// Upstream kernel repository.
    pub repo: PathBuf,
    /// Provisioned trees; `<workdir>/trees` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trees: Option<PathBuf>,
    pub tag_format: String,
    /// Commands run once in each new tree (`{kernel_dir}`, `{version}`, `{jobs}`).
    #[serde(default)]
    pub prepare: Vec<CommandTemplate>,
    pub net_subtree: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSettings {
    pub repo: PathBuf,
    pub branch_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub repo: PathBuf,
    pub rev: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    pub jobs: usize,
    #[serde(default)]
    pub keep_build_dirs: bool,
    pub configure: CommandTemplate,
    pub make: CommandTemplate,
}

/// A configured driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: DriverKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Location in the kernel tree, skipping the search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_kind() -> DriverKind {
    DriverKind::Vanilla
}

impl DriverSpec {
    pub fn key(&self) -> Result<DriverKey, PatchIdError> {
        DriverKey::new(self.kind, &self.name, self.version.as_deref())
    }
}

impl Settings {
    pub fn trees_dir(&self) -> PathBuf {
        self.kernel
            .trees
            .clone()
            .unwrap_or_else(|| self.workdir.join("trees"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.workdir.join("cache")
    }

    pub fn driver(&self, name: &str) -> Option<&DriverSpec> {
        self.drivers.iter().find(|d| d.name == name)
    }

    /// Key for `name`: the configured driver, else an in-tree one.
    pub fn driver_key(&self, name: &str) -> Result<DriverKey, PatchIdError> {
        match self.driver(name) {
            Some(spec) => spec.key(),
            None => DriverKey::vanilla(name),
        }
    }

    pub fn runner_config(&self, scratch_root: Option<&Path>) -> MakeRunnerConfig {
        MakeRunnerConfig {
            configure: self.build.configure.clone(),
            make: self.build.make.clone(),
            keep_build_dirs: self.build.keep_build_dirs,
            scratch_root: scratch_root.map(Path::to_path_buf),
        }
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), String> {
        if self.build.jobs == 0 {
            return Err("build.jobs must be at least 1".to_string());
        }
        for (key, format) in [
            ("kernel.tag_format", &self.kernel.tag_format),
            ("reference.branch_format", &self.reference.branch_format),
        ] {
            if !format.contains("{version}") {
                return Err(format!("{} must contain {{version}}", key));
            }
        }
        if self.build.configure.0.is_empty() || self.build.make.0.is_empty() {
            return Err("build.configure and build.make must not be empty".to_string());
        }
        for spec in &self.drivers {
            spec.key().map_err(|e| format!("drivers: {}", e))?;
        }
        Ok(())
    }
}
