//! Built-in defaults (layer 1)

use np_build::MakeRunnerConfig;
use serde::{Deserialize, Serialize};

/// Default values for every setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Root of the patch collections and the verification cache.
    pub workdir: String,

    pub kernel_repo: String,

    /// Upstream release tag (default: "v{version}")
    pub tag_format: String,

    /// Driver search root inside a kernel tree (default: "drivers/net")
    pub net_subtree: String,

    pub reference_repo: String,

    /// Reference branch holding the netmap changes (default: "netmap-{version}")
    pub branch_format: String,

    /// Repository with the build-driving netmap sources (default: ".")
    pub source_repo: String,

    pub source_rev: String,

    /// Compiler parallelism (default: available CPUs)
    pub jobs: usize,

    pub keep_build_dirs: bool,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            workdir: ".np".to_string(),
            kernel_repo: "linux".to_string(),
            tag_format: "v{version}".to_string(),
            net_subtree: "drivers/net".to_string(),
            reference_repo: "linux".to_string(),
            branch_format: "netmap-{version}".to_string(),
            source_repo: ".".to_string(),
            source_rev: "HEAD".to_string(),
            jobs: std::thread::available_parallelism().map_or(1, |n| n.get()),
            keep_build_dirs: false,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to the JSON layer that later layers merge onto.
    pub fn to_value(&self) -> serde_json::Value {
        let runner = MakeRunnerConfig::default();
        serde_json::json!({
            "workdir": self.workdir,
            "kernel": {
                "repo": self.kernel_repo,
                "tag_format": self.tag_format,
                "prepare": [],
                "net_subtree": self.net_subtree
            },
            "reference": {
                "repo": self.reference_repo,
                "branch_format": self.branch_format
            },
            "source": {
                "repo": self.source_repo,
                "rev": self.source_rev
            },
            "build": {
                "jobs": self.jobs,
                "keep_build_dirs": self.keep_build_dirs,
                "configure": runner.configure,
                "make": runner.make
            },
            "drivers": []
        })
    }
}
