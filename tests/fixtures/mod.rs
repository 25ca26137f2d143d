//! Shared fixtures for the integration tests
//!
//! A [`Harness`] owns a scratch directory holding small kernel trees and a
//! work directory, and wires a [`Pipeline`] to the in-memory VCS, kernel
//! provisioner and build runner from `netmap_patches::mock`. Patch
//! collections and the verdict cache live on disk under the work directory.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use netmap_patches::config::EffectiveConfig;
use netmap_patches::mock::{MockBuildRunner, MockProvisioner, MockVcs};
use netmap_patches::store::DirStore;
use netmap_patches::{Collaborators, DriverKey, Pipeline, Settings, VersionId};
use np_build::DirVerdictCache;
use serde_json::json;
use tempfile::TempDir;

/// Commit the mock resolves for the build-driving source.
pub const SOURCE_COMMIT: &str = "c0ffee";

/// Pristine driver source for the older releases.
pub const OLD_SOURCE: &str = "int a;\n";

/// Pristine driver source once `b` was added upstream.
pub const NEW_SOURCE: &str = "int a;\nint b;\n";

/// netmap change against [`OLD_SOURCE`].
pub const OLD_DIFF: &str = "\
--- a/netdev.c
+++ b/netdev.c
@@ -1 +1,2 @@
 int a;
+int netmap;
";

/// netmap change against [`NEW_SOURCE`].
pub const NEW_DIFF: &str = "\
--- a/netdev.c
+++ b/netdev.c
@@ -1,2 +1,3 @@
 int a;
 int b;
+int netmap_rx;
";

pub fn v26(patch: u32) -> VersionId {
    VersionId::new(2, 6, patch)
}

pub fn e1000e() -> DriverKey {
    DriverKey::vanilla("e1000e").expect("valid driver name")
}

pub struct Harness {
    pub root: TempDir,
    pub vcs: MockVcs,
    pub prov: MockProvisioner,
    pub runner: MockBuildRunner,
    pub store: Arc<DirStore>,
    pub cache: Arc<DirVerdictCache>,
    pub settings: Settings,
}

impl Harness {
    pub fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let workdir = root.path().join("work");
        let overrides = json!({
            "workdir": workdir,
            "build": { "jobs": 2 },
            "drivers": [
                { "name": "e1000e" },
                { "name": "igb" }
            ]
        });
        let settings = EffectiveConfig::build(None, None, Some(overrides))
            .expect("config")
            .settings()
            .expect("settings");

        let vcs = MockVcs::new();
        vcs.add_ref("HEAD", SOURCE_COMMIT);

        Self {
            vcs,
            prov: MockProvisioner::new(),
            runner: MockBuildRunner::new(),
            store: Arc::new(DirStore::new(settings.workdir.clone())),
            cache: Arc::new(DirVerdictCache::new(settings.cache_dir())),
            settings,
            root,
        }
    }

    /// Create a kernel tree for `version` with `drivers/net/<driver>/netdev.c`.
    pub fn add_kernel(&self, version: VersionId, driver: &str, source: &str) -> PathBuf {
        let tree = self.root.path().join("trees").join(format!("linux-{}", version));
        let dir = tree.join("drivers/net").join(driver);
        fs::create_dir_all(&dir).expect("create driver dir");
        fs::write(dir.join("netdev.c"), source).expect("write driver source");
        self.prov.add_tree(version, &tree);
        tree
    }

    /// Record the reference change for `version`.
    pub fn set_netmap_diff(&self, version: VersionId, diff: &str) {
        self.vcs
            .set_diff(&format!("v{}", version), &format!("netmap-{}", version), diff);
    }

    /// Kernel trees 2.6.32 to 2.6.35: the driver changes upstream at 2.6.34.
    pub fn with_two_eras(self) -> Self {
        for patch in [32, 33] {
            self.add_kernel(v26(patch), "e1000e", OLD_SOURCE);
            self.set_netmap_diff(v26(patch), OLD_DIFF);
        }
        for patch in [34, 35] {
            self.add_kernel(v26(patch), "e1000e", NEW_SOURCE);
            self.set_netmap_diff(v26(patch), NEW_DIFF);
        }
        self
    }

    pub fn pipeline(&self) -> Pipeline {
        let parts = Collaborators {
            vcs: Arc::new(self.vcs.clone()),
            provisioner: Arc::new(self.prov.clone()),
            runner: Arc::new(self.runner.clone()),
            store: self.store.clone(),
            cache: self.cache.clone(),
        };
        Pipeline::new(self.settings.clone(), parts)
    }
}
